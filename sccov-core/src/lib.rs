//! Per-group coverage tracks and fragment exports for single-cell genomic
//! data.
//!
//! The pipeline partitions cells into groups, accumulates each group's
//! fragments (or Tn5 insertion events) into fixed-width genomic bins,
//! normalizes and optionally smooths the signal, and writes one bedGraph or
//! BigWig track per group, processing groups in parallel.

pub mod coverage;
pub mod error;
pub mod export;
pub mod fragment;
pub mod genome;
pub mod regions;
pub mod source;
pub mod utils;

pub use coverage::{BinTrack, Normalization};
pub use error::ExportError;
pub use export::{CoverageOptions, CoverageOutputFormat, Exporter};
pub use fragment::{CountingStrategy, Fragment, LengthFilter};
pub use genome::{ChromSizes, GenomeBaseIndex};
pub use regions::RegionSet;
pub use source::{FragmentSource, MemoryFragmentSource};
pub use utils::Compression;
