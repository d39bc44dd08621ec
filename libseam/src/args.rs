//! Linker settings that affect the folding pass. The front-end is responsible for populating
//! this from the command line.

use std::num::NonZeroUsize;

#[derive(Debug, Clone)]
pub struct Args {
    /// Report which sections were folded into which and the total bytes saved.
    pub print_icf_sections: bool,

    /// The number of worker threads to use. Defaults to the available hardware parallelism.
    pub num_threads: NonZeroUsize,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            print_icf_sections: false,
            num_threads: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        }
    }
}
