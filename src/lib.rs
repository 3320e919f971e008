/// Use mimalloc as the global allocator.
/// The merge phase allocates a scratch buffer the size of the input and
/// oversized record swaps allocate per call; mimalloc's thread-local
/// caching keeps both cheap under the parallel chunk phase.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod common;
pub mod sort;
