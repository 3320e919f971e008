/// Orchestration for fbsort: the `/`-separated parameter grammar, file
/// validation, input-to-output copy, read-write mapping, sort, and flush.
use std::fs::{self, OpenOptions};
use std::time::{Duration, Instant};

use memmap2::MmapMut;

use crate::common::io_error_msg;

use super::engine::SortEngine;
use super::error::SortError;
use super::key::{parse_sort_spec, validate_keys, KeySpec};

/// A validated sort invocation.
#[derive(Debug, Clone)]
pub struct Arguments {
    pub input: String,
    pub output: String,
    pub keys: Vec<KeySpec>,
    pub record_length: usize,
    pub thread_count: usize,
}

/// Host hardware concurrency, or 1 when unknown.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Extract the value of a `name(value)` parameter token.
fn extract_param<'a>(arg: &'a str, name: &str) -> Option<&'a str> {
    arg.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

impl Arguments {
    /// Parse the token stream `<input> <output> / <parameters>`.
    /// Parameters after the `/` separator may appear in any order;
    /// `sort(...)` and `record(...)` are required.
    pub fn parse(tokens: &[String]) -> Result<Arguments, SortError> {
        if tokens.len() < 3 {
            return Err(SortError::Argument("insufficient arguments".to_string()));
        }

        let input = tokens[0].clone();
        let output = tokens[1].clone();

        let sep = tokens[2..]
            .iter()
            .position(|t| t == "/")
            .map(|p| p + 2)
            .ok_or_else(|| SortError::Argument("missing '/' separator".to_string()))?;

        let mut keys: Vec<KeySpec> = Vec::new();
        let mut record_length: usize = 0;
        let mut thread_count = default_thread_count();

        for arg in &tokens[sep + 1..] {
            if let Some(value) = extract_param(arg, "sort") {
                keys = parse_sort_spec(value).map_err(SortError::Argument)?;
            } else if let Some(value) = extract_param(arg, "record") {
                record_length = value.trim().parse().map_err(|_| {
                    SortError::Argument(format!("invalid record length '{}'", value))
                })?;
            } else if let Some(value) = extract_param(arg, "thread_count") {
                let t: usize = value.trim().parse().map_err(|_| {
                    SortError::Argument(format!("invalid thread count '{}'", value))
                })?;
                thread_count = t.max(1);
            } else {
                return Err(SortError::Argument(format!("unknown parameter '{}'", arg)));
            }
        }

        if keys.is_empty() {
            return Err(SortError::Argument("missing sort specification".to_string()));
        }
        if record_length == 0 {
            return Err(SortError::Argument(
                "missing or invalid record length".to_string(),
            ));
        }
        validate_keys(&keys, record_length).map_err(SortError::Key)?;

        Ok(Arguments {
            input,
            output,
            keys,
            record_length,
            thread_count,
        })
    }
}

/// Timings and sizes reported back to the binary for its banner.
#[derive(Debug, Clone, Copy)]
pub struct SortStats {
    pub records: usize,
    pub bytes: u64,
    /// None for an in-place sort (output is the input file).
    pub copy_time: Option<Duration>,
    pub sort_time: Duration,
}

fn file_err(path: &str, e: &std::io::Error) -> SortError {
    SortError::File {
        path: path.to_string(),
        message: io_error_msg(e),
    }
}

/// Same-file check by device and inode on unix, canonical path elsewhere.
/// A missing output is never the same file.
fn is_same_file(a: &str, b: &str) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(pa), Ok(pb)) => pa == pb,
            _ => false,
        }
    }
}

/// Run a full sort invocation: validate the input, copy to the output
/// unless sorting in place, map the output read-write, sort, and flush
/// synchronously. Either the output file ends fully sorted and flushed or
/// an error is returned; there are no partial successes.
pub fn sort_file(args: &Arguments) -> Result<SortStats, SortError> {
    let r = args.record_length;

    let meta = fs::metadata(&args.input).map_err(|e| file_err(&args.input, &e))?;
    if !meta.is_file() {
        return Err(SortError::File {
            path: args.input.clone(),
            message: "not a regular file".to_string(),
        });
    }
    let size = meta.len();
    if size % r as u64 != 0 {
        return Err(SortError::Alignment {
            size,
            record_len: r,
        });
    }
    let records = (size / r as u64) as usize;

    let copy_time = if is_same_file(&args.input, &args.output) {
        None
    } else {
        let start = Instant::now();
        fs::copy(&args.input, &args.output).map_err(|e| file_err(&args.output, &e))?;
        Some(start.elapsed())
    };

    // A zero-length file cannot be mapped and is already sorted.
    if records == 0 {
        return Ok(SortStats {
            records: 0,
            bytes: 0,
            copy_time,
            sort_time: Duration::ZERO,
        });
    }

    let engine = SortEngine::new(&args.keys, r, args.thread_count)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.output)
        .map_err(|e| file_err(&args.output, &e))?;
    // SAFETY: the mapping lives only inside this call and the file is not
    // resized while mapped.
    let mut map = unsafe { MmapMut::map_mut(&file) }
        .map_err(|e| SortError::Resource(format!("mmap {}: {}", args.output, io_error_msg(&e))))?;

    let start = Instant::now();
    engine.sort(&mut map)?;
    let sort_time = start.elapsed();

    // msync(MS_SYNC): the permuted records reach disk before we report success.
    map.flush().map_err(|e| file_err(&args.output, &e))?;

    Ok(SortStats {
        records,
        bytes: size,
        copy_time,
        sort_time,
    })
}

/// Usage block printed to stderr alongside argument errors.
pub fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} <input> <output> / <parameters>\n\
         \n\
         Parameters (any order after '/'):\n\
         \x20 sort(pos,len,type,order[,...])\n\
         \x20   pos:   1-based byte position in the record\n\
         \x20   len:   key length in bytes\n\
         \x20   type:  c=character, w=little-endian int, W=big-endian int, f=little-endian float\n\
         \x20   order: a=ascending, d=descending\n\
         \x20 record(length)\n\
         \x20   record length in bytes (required)\n\
         \x20 thread_count(N)\n\
         \x20   worker threads (default: CPU cores)\n\
         \n\
         Example:\n\
         \x20 {} input.dat output.dat / sort(1,4,w,a,5,4,w,d) record(16) thread_count(4)",
        program, program
    );
}
