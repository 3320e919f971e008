/// JIT comparator generation.
///
/// A key list is fixed for the whole sort but consulted ~N log N times, so
/// the generator emits straight-line x86-64 machine code with the key
/// offsets, widths, and byte orders baked in as immediates. When the host
/// cannot run the emitter (non-unix, non-x86-64) or emission fails, the
/// generator returns an interpreted comparator that dispatches to
/// `compare_records`; the two are indistinguishable except in speed.
use std::cmp::Ordering;

use super::compare::compare_records;
use super::key::KeySpec;

/// Signature of the emitted function: two record pointers in, the
/// comparison sign in `eax` (System V AMD64: rdi = a, rsi = b).
type CmpFn = unsafe extern "C" fn(*const u8, *const u8) -> i32;

/// Whether native comparator emission is supported on this host.
pub fn jit_available() -> bool {
    cfg!(all(unix, target_arch = "x86_64"))
}

enum Kind {
    #[cfg(all(unix, target_arch = "x86_64"))]
    Native {
        /// Owns the executable range; dropped when the comparator is.
        _code: emit::ExecPage,
        func: CmpFn,
    },
    Interpreted,
}

/// A comparison callable specialized to one key list. Immutable once
/// built and safe to call concurrently from any worker. Each sort
/// invocation carries its own value; there is no process-wide state.
pub struct Comparator {
    keys: Vec<KeySpec>,
    record_len: usize,
    kind: Kind,
}

impl Comparator {
    /// The fallback comparator: dispatches every call to the reference
    /// key-list walk.
    pub fn interpreted(keys: Vec<KeySpec>, record_len: usize) -> Comparator {
        Comparator {
            keys,
            record_len,
            kind: Kind::Interpreted,
        }
    }

    /// The key list this comparator was built for.
    pub fn keys(&self) -> &[KeySpec] {
        &self.keys
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// True when calls go through emitted machine code.
    pub fn is_native(&self) -> bool {
        match self.kind {
            #[cfg(all(unix, target_arch = "x86_64"))]
            Kind::Native { .. } => true,
            Kind::Interpreted => false,
        }
    }

    /// Raw comparison used by the sort inner loop.
    ///
    /// # Safety
    /// `a` and `b` must point at readable regions of at least the record
    /// length the comparator was built for.
    #[inline]
    pub(crate) unsafe fn compare_ptr(&self, a: *const u8, b: *const u8) -> i32 {
        match &self.kind {
            #[cfg(all(unix, target_arch = "x86_64"))]
            Kind::Native { func, .. } => (*func)(a, b),
            Kind::Interpreted => {
                let ra = std::slice::from_raw_parts(a, self.record_len);
                let rb = std::slice::from_raw_parts(b, self.record_len);
                match compare_records(ra, rb, &self.keys) {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }
            }
        }
    }

    /// Compare two full records.
    #[inline]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.record_len);
        debug_assert_eq!(b.len(), self.record_len);
        // SAFETY: both slices span exactly one record.
        unsafe { self.compare_ptr(a.as_ptr(), b.as_ptr()) }.cmp(&0)
    }
}

/// Build a comparator for `keys` over records of `record_len` bytes.
/// Emits native code when the host supports it, otherwise (or on any
/// emission failure) returns the interpreted fallback.
pub fn generate(keys: &[KeySpec], record_len: usize) -> Comparator {
    #[cfg(all(unix, target_arch = "x86_64"))]
    {
        if let Ok((code, func)) = emit::emit_comparator(keys) {
            return Comparator {
                keys: keys.to_vec(),
                record_len,
                kind: Kind::Native { _code: code, func },
            };
        }
    }
    Comparator::interpreted(keys.to_vec(), record_len)
}

#[cfg(all(unix, target_arch = "x86_64"))]
mod emit {
    use super::CmpFn;
    use crate::sort::key::{KeySpec, KeyType, SortOrder};
    use std::ptr;

    /// Emission failure. Never surfaced to callers of `generate`; the
    /// generator recovers by returning the interpreted comparator.
    #[derive(Debug)]
    pub(super) enum JitError {
        Alloc,
        Protect,
        Overflow,
        OffsetRange,
    }

    /// An executable code range. Read+execute from `finish` until drop;
    /// releases the exact mapped range.
    pub(super) struct ExecPage {
        mem: *mut u8,
        len: usize,
    }

    // SAFETY: the range is never written after `CodeBuf::finish` remaps it
    // read+execute, so sharing the pointer across threads is sound.
    unsafe impl Send for ExecPage {}
    unsafe impl Sync for ExecPage {}

    impl ExecPage {
        fn entry(&self) -> *const u8 {
            self.mem
        }
    }

    impl Drop for ExecPage {
        fn drop(&mut self) {
            // SAFETY: mem/len are the exact range returned by mmap.
            unsafe {
                libc::munmap(self.mem as *mut libc::c_void, self.len);
            }
        }
    }

    /// Fixed-capacity code buffer backed by an anonymous RW mapping.
    /// Writing past the reservation fails the generation attempt instead
    /// of returning a half-written function.
    struct CodeBuf {
        mem: *mut u8,
        pos: usize,
        cap: usize,
    }

    fn page_size() -> usize {
        // SAFETY: sysconf has no memory preconditions.
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz > 0 {
            sz as usize
        } else {
            4096
        }
    }

    impl CodeBuf {
        fn with_capacity(want: usize) -> Result<CodeBuf, JitError> {
            let page = page_size();
            let cap = ((want.max(page) + page - 1) / page) * page;
            // SAFETY: anonymous private mapping, no fd, checked result.
            let mem = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    cap,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if mem == libc::MAP_FAILED {
                return Err(JitError::Alloc);
            }
            Ok(CodeBuf {
                mem: mem as *mut u8,
                pos: 0,
                cap,
            })
        }

        fn put(&mut self, bytes: &[u8]) -> Result<(), JitError> {
            if self.pos + bytes.len() > self.cap {
                return Err(JitError::Overflow);
            }
            // SAFETY: bounds checked above; the region is RW until finish.
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), self.mem.add(self.pos), bytes.len());
            }
            self.pos += bytes.len();
            Ok(())
        }

        fn put_u32(&mut self, v: u32) -> Result<(), JitError> {
            self.put(&v.to_le_bytes())
        }

        /// Remap the reservation read+execute and hand ownership to an
        /// ExecPage. W^X: the range is never writable and executable at
        /// the same time.
        fn finish(self) -> Result<ExecPage, JitError> {
            let page = ExecPage {
                mem: self.mem,
                len: self.cap,
            };
            std::mem::forget(self);
            // SAFETY: page owns the whole mapped range.
            let rc = unsafe {
                libc::mprotect(
                    page.mem as *mut libc::c_void,
                    page.len,
                    libc::PROT_READ | libc::PROT_EXEC,
                )
            };
            if rc != 0 {
                return Err(JitError::Protect);
            }
            Ok(page)
        }
    }

    impl Drop for CodeBuf {
        fn drop(&mut self) {
            // SAFETY: mem/cap are the exact range returned by mmap.
            unsafe {
                libc::munmap(self.mem as *mut libc::c_void, self.cap);
            }
        }
    }

    // Register numbers used in ModRM/SIB encodings.
    const RAX: u8 = 0;
    const RCX: u8 = 1;
    /// Record A pointer (first SysV integer argument).
    const RDI: u8 = 7;
    /// Record B pointer (second SysV integer argument).
    const RSI: u8 = 6;

    /// ModRM byte for `[base + disp32]` (mod = 10).
    fn modrm_disp32(reg: u8, base: u8) -> u8 {
        0x80 | (reg << 3) | base
    }

    const SETG: u8 = 0x9F;
    const SETA: u8 = 0x97;

    /// Upper bound on emitted bytes per key block (largest is the
    /// big-endian 16-bit block at 51 bytes; the byte loop is 48).
    const KEY_BLOCK_MAX: usize = 96;

    /// Emit the full comparison function for a validated key list.
    pub(super) fn emit_comparator(keys: &[KeySpec]) -> Result<(ExecPage, CmpFn), JitError> {
        let mut code = CodeBuf::with_capacity(keys.len() * KEY_BLOCK_MAX + 16)?;

        for key in keys {
            emit_key(&mut code, key)?;
        }

        // All keys equal.
        code.put(&[0x31, 0xC0])?; // xor eax, eax
        code.put(&[0xC3])?; // ret

        let page = code.finish()?;
        // SAFETY: the page holds a complete leaf function with the CmpFn ABI.
        let func: CmpFn = unsafe { std::mem::transmute(page.entry()) };
        Ok((page, func))
    }

    /// One per-key block: load both values, compare, return a signed
    /// result on inequality, fall through on equality.
    fn emit_key(code: &mut CodeBuf, key: &KeySpec) -> Result<(), JitError> {
        let off: u32 = key
            .offset()
            .try_into()
            .map_err(|_| JitError::OffsetRange)?;
        if off > i32::MAX as u32 || key.length > i32::MAX as usize {
            return Err(JitError::OffsetRange);
        }
        let desc = key.order == SortOrder::Descending;

        match key.ty {
            KeyType::LittleEndianInt => {
                emit_int_le(code, off, key.length)?;
                emit_branch_result(code, SETG, desc)
            }
            KeyType::BigEndianInt => {
                emit_int_be(code, off, key.length)?;
                emit_branch_result(code, SETG, desc)
            }
            KeyType::LittleEndianFloat => {
                emit_float(code, off, key.length)?;
                emit_branch_result(code, SETA, desc)
            }
            KeyType::Character => match key.length {
                1 | 2 | 4 | 8 => {
                    emit_char_wide(code, off, key.length)?;
                    emit_branch_result(code, SETA, desc)
                }
                _ => emit_char_loop(code, off, key.length as u32, desc),
            },
        }
    }

    /// Sign-extended little-endian integer loads, then `cmp rax, rcx`.
    fn emit_int_le(code: &mut CodeBuf, off: u32, len: usize) -> Result<(), JitError> {
        match len {
            2 => {
                // movsx rax, word [rdi+off] / movsx rcx, word [rsi+off]
                code.put(&[0x48, 0x0F, 0xBF, modrm_disp32(RAX, RDI)])?;
                code.put_u32(off)?;
                code.put(&[0x48, 0x0F, 0xBF, modrm_disp32(RCX, RSI)])?;
                code.put_u32(off)?;
            }
            4 => {
                // movsxd rax, dword [rdi+off] / movsxd rcx, dword [rsi+off]
                code.put(&[0x48, 0x63, modrm_disp32(RAX, RDI)])?;
                code.put_u32(off)?;
                code.put(&[0x48, 0x63, modrm_disp32(RCX, RSI)])?;
                code.put_u32(off)?;
            }
            8 => {
                // mov rax, [rdi+off] / mov rcx, [rsi+off]
                code.put(&[0x48, 0x8B, modrm_disp32(RAX, RDI)])?;
                code.put_u32(off)?;
                code.put(&[0x48, 0x8B, modrm_disp32(RCX, RSI)])?;
                code.put_u32(off)?;
            }
            _ => unreachable!("integer key width checked at admission"),
        }
        code.put(&[0x48, 0x39, 0xC8]) // cmp rax, rcx
    }

    /// Big-endian integer loads: unsigned load, byte swap, sign extend,
    /// then `cmp rax, rcx`.
    fn emit_int_be(code: &mut CodeBuf, off: u32, len: usize) -> Result<(), JitError> {
        match len {
            2 => {
                code.put(&[0x0F, 0xB7, modrm_disp32(RAX, RDI)])?; // movzx eax, word [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x66, 0xC1, 0xC0, 0x08])?; // rol ax, 8
                code.put(&[0x48, 0x0F, 0xBF, 0xC0])?; // movsx rax, ax
                code.put(&[0x0F, 0xB7, modrm_disp32(RCX, RSI)])?; // movzx ecx, word [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x66, 0xC1, 0xC1, 0x08])?; // rol cx, 8
                code.put(&[0x48, 0x0F, 0xBF, 0xC9])?; // movsx rcx, cx
            }
            4 => {
                code.put(&[0x8B, modrm_disp32(RAX, RDI)])?; // mov eax, [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x0F, 0xC8])?; // bswap eax
                code.put(&[0x48, 0x63, 0xC0])?; // movsxd rax, eax
                code.put(&[0x8B, modrm_disp32(RCX, RSI)])?; // mov ecx, [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x0F, 0xC9])?; // bswap ecx
                code.put(&[0x48, 0x63, 0xC9])?; // movsxd rcx, ecx
            }
            8 => {
                code.put(&[0x48, 0x8B, modrm_disp32(RAX, RDI)])?; // mov rax, [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x48, 0x0F, 0xC8])?; // bswap rax
                code.put(&[0x48, 0x8B, modrm_disp32(RCX, RSI)])?; // mov rcx, [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x48, 0x0F, 0xC9])?; // bswap rcx
            }
            _ => unreachable!("integer key width checked at admission"),
        }
        code.put(&[0x48, 0x39, 0xC8]) // cmp rax, rcx
    }

    /// Widened character loads: big-endian view makes unsigned integer
    /// order equal byte order. Leaves unsigned flags from the cmp.
    fn emit_char_wide(code: &mut CodeBuf, off: u32, len: usize) -> Result<(), JitError> {
        match len {
            1 => {
                code.put(&[0x0F, 0xB6, modrm_disp32(RAX, RDI)])?; // movzx eax, byte [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x0F, 0xB6, modrm_disp32(RCX, RSI)])?; // movzx ecx, byte [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x39, 0xC8]) // cmp eax, ecx
            }
            2 => {
                code.put(&[0x0F, 0xB7, modrm_disp32(RAX, RDI)])?; // movzx eax, word [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x66, 0xC1, 0xC0, 0x08])?; // rol ax, 8
                code.put(&[0x0F, 0xB7, modrm_disp32(RCX, RSI)])?; // movzx ecx, word [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x66, 0xC1, 0xC1, 0x08])?; // rol cx, 8
                code.put(&[0x39, 0xC8]) // cmp eax, ecx
            }
            4 => {
                code.put(&[0x8B, modrm_disp32(RAX, RDI)])?; // mov eax, [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x0F, 0xC8])?; // bswap eax
                code.put(&[0x8B, modrm_disp32(RCX, RSI)])?; // mov ecx, [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x0F, 0xC9])?; // bswap ecx
                code.put(&[0x39, 0xC8]) // cmp eax, ecx
            }
            8 => {
                code.put(&[0x48, 0x8B, modrm_disp32(RAX, RDI)])?; // mov rax, [rdi+off]
                code.put_u32(off)?;
                code.put(&[0x48, 0x0F, 0xC8])?; // bswap rax
                code.put(&[0x48, 0x8B, modrm_disp32(RCX, RSI)])?; // mov rcx, [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x48, 0x0F, 0xC9])?; // bswap rcx
                code.put(&[0x48, 0x39, 0xC8]) // cmp rax, rcx
            }
            _ => unreachable!("widened character widths are 1/2/4/8"),
        }
    }

    /// Scalar SSE float compare. ucomiss/ucomisd set ZF on equal AND on
    /// unordered, so NaN comparisons take the fall-through (equal) path,
    /// matching the reference comparator.
    fn emit_float(code: &mut CodeBuf, off: u32, len: usize) -> Result<(), JitError> {
        match len {
            4 => {
                code.put(&[0xF3, 0x0F, 0x10, modrm_disp32(0, RDI)])?; // movss xmm0, [rdi+off]
                code.put_u32(off)?;
                code.put(&[0xF3, 0x0F, 0x10, modrm_disp32(1, RSI)])?; // movss xmm1, [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x0F, 0x2E, 0xC1]) // ucomiss xmm0, xmm1
            }
            8 => {
                code.put(&[0xF2, 0x0F, 0x10, modrm_disp32(0, RDI)])?; // movsd xmm0, [rdi+off]
                code.put_u32(off)?;
                code.put(&[0xF2, 0x0F, 0x10, modrm_disp32(1, RSI)])?; // movsd xmm1, [rsi+off]
                code.put_u32(off)?;
                code.put(&[0x66, 0x0F, 0x2E, 0xC1]) // ucomisd xmm0, xmm1
            }
            _ => unreachable!("float key width checked at admission"),
        }
    }

    /// Bytes in the setcc/ret materialization the je/jmp must skip.
    fn result_len(desc: bool) -> u8 {
        if desc {
            16
        } else {
            14
        }
    }

    /// After a flag-setting compare: fall through to the next key block on
    /// equality, otherwise materialize ±1 (negated for descending) and
    /// return.
    fn emit_branch_result(code: &mut CodeBuf, setcc: u8, desc: bool) -> Result<(), JitError> {
        code.put(&[0x74, result_len(desc)])?; // je .next
        emit_setcc_result(code, setcc, desc)
    }

    /// `setcc al; movzx eax, al; lea eax, [rax*2-1]; [neg eax;] ret`
    /// turns the condition into -1 or +1 in eax.
    fn emit_setcc_result(code: &mut CodeBuf, setcc: u8, desc: bool) -> Result<(), JitError> {
        code.put(&[0x0F, setcc, 0xC0])?; // setcc al
        code.put(&[0x0F, 0xB6, 0xC0])?; // movzx eax, al
        code.put(&[0x8D, 0x04, 0x45, 0xFF, 0xFF, 0xFF, 0xFF])?; // lea eax, [rax*2-1]
        if desc {
            code.put(&[0xF7, 0xD8])?; // neg eax
        }
        code.put(&[0xC3]) // ret
    }

    /// Byte-wise compare loop for character keys whose length has no
    /// widened form. rcx indexes, rax/rdx hold the current bytes.
    fn emit_char_loop(
        code: &mut CodeBuf,
        off: u32,
        len: u32,
        desc: bool,
    ) -> Result<(), JitError> {
        code.put(&[0x31, 0xC9])?; // xor ecx, ecx
        // .byte_loop: (30 bytes through the jb below)
        code.put(&[0x0F, 0xB6, 0x84, 0x0F])?; // movzx eax, byte [rdi+rcx+off]
        code.put_u32(off)?;
        code.put(&[0x0F, 0xB6, 0x94, 0x0E])?; // movzx edx, byte [rsi+rcx+off]
        code.put_u32(off)?;
        code.put(&[0x39, 0xD0])?; // cmp eax, edx
        code.put(&[0x75, 0x0C])?; // jne .differ
        code.put(&[0xFF, 0xC1])?; // inc ecx
        code.put(&[0x81, 0xF9])?; // cmp ecx, len
        code.put_u32(len)?;
        code.put(&[0x72, 0xE2])?; // jb .byte_loop
        code.put(&[0xEB, result_len(desc)])?; // jmp .next (all bytes equal)
        // .differ:
        emit_setcc_result(code, SETA, desc)
    }
}
