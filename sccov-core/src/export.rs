//! Per-group export of fragment subsets and coverage tracks.
//!
//! Both entry points partition cells by group label, fan one pipeline per
//! group out onto a bounded worker pool, and return the map of groups that
//! produced an output file. A failure inside one group's pipeline is logged
//! and degrades only that group; the call fails only when every group failed.

use anyhow::{ensure, Context, Result};
use bed_utils::bed::{BEDLike, BedGraph};
use bigtools::bed::bedparser::BedParser;
use bigtools::bedchromdata::BedParserStreamingIterator;
use bigtools::{BigWigWrite, Value};
use indexmap::IndexMap;
use indicatif::{style::ProgressStyle, ParallelProgressIterator};
use log::{error, info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};
use tempfile::Builder;

use crate::coverage::{smooth, BinTrack, Normalization};
use crate::error::ExportError;
use crate::fragment::{CountingStrategy, Fragment, LengthFilter};
use crate::genome::{ChromSizes, GenomeBaseIndex};
use crate::regions::RegionSet;
use crate::source::FragmentSource;
use crate::utils::{encode_writer, open_file_for_write, Compression};

const PROGRESS_TEMPLATE: &str = "[{elapsed}] {bar:40.cyan/blue} {pos:>7}/{len:7} (eta: {eta})";

/// On-disk representation of a coverage track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageOutputFormat {
    BedGraph,
    BigWig,
}

impl FromStr for CoverageOutputFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bedgraph" => Ok(CoverageOutputFormat::BedGraph),
            "bigwig" => Ok(CoverageOutputFormat::BigWig),
            _ => Err(ExportError::Config(format!(
                "output format must be 'bedgraph' or 'bigwig', got: {}",
                s
            ))),
        }
    }
}

/// Recognize the track format from a file-name suffix, ignoring a trailing
/// compression extension.
pub fn infer_track_format(suffix: &str) -> Option<CoverageOutputFormat> {
    let s = suffix.to_lowercase();
    let s = s
        .strip_suffix(".gz")
        .or_else(|| s.strip_suffix(".zst"))
        .unwrap_or(&s);
    if s.ends_with(".bedgraph") || s.ends_with(".bg") {
        Some(CoverageOutputFormat::BedGraph)
    } else if s.ends_with(".bw") || s.ends_with(".bigwig") {
        Some(CoverageOutputFormat::BigWig)
    } else {
        None
    }
}

/// Knobs of the coverage pipeline. The region sets are shared read-only
/// across all group tasks.
#[derive(Debug, Clone, Copy)]
pub struct CoverageOptions<'a> {
    /// Bin width in base pairs.
    pub bin_size: u64,
    pub normalization: Normalization,
    pub counting_strategy: CountingStrategy,
    /// Fragments overlapping these regions are dropped before accumulation.
    pub blacklist: Option<&'a RegionSet>,
    /// When set, only reads overlapping these regions count toward the
    /// normalization total.
    pub include_for_norm: Option<&'a RegionSet>,
    /// Reads overlapping these regions never count toward the normalization
    /// total, even when they also match the include set.
    pub exclude_for_norm: Option<&'a RegionSet>,
    /// Moving-average window in base pairs.
    pub smooth_window: Option<u64>,
    pub min_frag_length: Option<u64>,
    pub max_frag_length: Option<u64>,
}

impl Default for CoverageOptions<'_> {
    fn default() -> Self {
        Self {
            bin_size: 10,
            normalization: Normalization::RPKM,
            counting_strategy: CountingStrategy::Fragment,
            blacklist: None,
            include_for_norm: None,
            exclude_for_norm: None,
            smooth_window: None,
            min_frag_length: None,
            max_frag_length: None,
        }
    }
}

impl<T> Exporter for T where T: FragmentSource + ?Sized {}

pub trait Exporter: FragmentSource {
    /// Write each group's fragments to `{dir}/{prefix}{group}{suffix}` as
    /// BED-like records. `ids` replaces the stored cell identifiers in the
    /// output; compression is inferred from the suffix unless given.
    fn export_fragments<P: AsRef<Path>>(
        &self,
        ids: Option<&[&str]>,
        group_by: &[&str],
        selections: Option<HashSet<&str>>,
        min_frag_length: Option<u64>,
        max_frag_length: Option<u64>,
        dir: P,
        prefix: &str,
        suffix: &str,
        compression: Option<Compression>,
        compression_level: Option<u32>,
        num_threads: Option<usize>,
    ) -> Result<IndexMap<String, PathBuf>> {
        if group_by.len() != self.n_cells() {
            return Err(ExportError::Config(format!(
                "number of group labels ({}) does not match number of cells ({})",
                group_by.len(),
                self.n_cells()
            ))
            .into());
        }
        if let Some(ids) = ids {
            if ids.len() != self.n_cells() {
                return Err(ExportError::Config(format!(
                    "number of ids ({}) does not match number of cells ({})",
                    ids.len(),
                    self.n_cells()
                ))
                .into());
            }
        }
        let groups = group_cells(group_by, selections.as_ref());
        if groups.is_empty() {
            return Ok(IndexMap::new());
        }

        let lengths = LengthFilter::new(min_frag_length, max_frag_length);
        let compression = compression.or_else(|| Compression::from_suffix(suffix));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create directory: {}", dir.as_ref().display()))?;
        let dir = dir.as_ref();

        info!("Exporting fragments of {} groups...", groups.len());
        run_group_tasks(groups, num_threads, |group, cells| {
            let filename = group_file_name(dir, prefix, group, suffix);
            let mut writer = open_file_for_write(&filename, compression, compression_level)?;
            for &cell in cells {
                for mut fragment in self.fragments(&[cell])? {
                    if !lengths.accepts(&fragment) {
                        continue;
                    }
                    if let Some(ids) = ids {
                        fragment.barcode = ids[cell].to_string();
                    }
                    writeln!(writer, "{}", fragment).map_err(ExportError::Io)?;
                }
            }
            writer.flush().map_err(ExportError::Io)?;
            Ok(filename)
        })
    }

    /// Compute one genome-wide coverage track per group and write it to
    /// `{dir}/{prefix}{group}{suffix}` as bedGraph or BigWig. The format is
    /// inferred from the suffix unless given explicitly; BigWig output is
    /// never further compressed.
    fn export_coverage<P: AsRef<Path>>(
        &self,
        group_by: &[&str],
        selections: Option<HashSet<&str>>,
        chrom_sizes: &ChromSizes,
        opts: &CoverageOptions<'_>,
        dir: P,
        prefix: &str,
        suffix: &str,
        format: Option<CoverageOutputFormat>,
        compression: Option<Compression>,
        compression_level: Option<u32>,
        temp_dir: Option<&Path>,
        num_threads: Option<usize>,
    ) -> Result<IndexMap<String, PathBuf>> {
        if group_by.len() != self.n_cells() {
            return Err(ExportError::Config(format!(
                "number of group labels ({}) does not match number of cells ({})",
                group_by.len(),
                self.n_cells()
            ))
            .into());
        }
        if opts.bin_size == 0 {
            return Err(ExportError::Config("bin size must be positive".to_string()).into());
        }
        let format = format
            .or_else(|| infer_track_format(suffix))
            .ok_or_else(|| {
                ExportError::Format(format!("cannot infer output format from suffix: {}", suffix))
            })?;
        let compression = match format {
            CoverageOutputFormat::BigWig => {
                if compression.is_some() {
                    warn!("bigwig tracks are internally compressed, ignoring the compression setting");
                }
                None
            }
            CoverageOutputFormat::BedGraph => {
                compression.or_else(|| Compression::from_suffix(suffix))
            }
        };
        let groups = group_cells(group_by, selections.as_ref());
        if groups.is_empty() {
            return Ok(IndexMap::new());
        }

        let lengths = LengthFilter::new(opts.min_frag_length, opts.max_frag_length);
        let index = GenomeBaseIndex::new(chrom_sizes).with_step(opts.bin_size);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create directory: {}", dir.as_ref().display()))?;
        let dir = dir.as_ref();

        info!("Computing coverage of {} groups...", groups.len());
        run_group_tasks(groups, num_threads, |group, cells| {
            let fragments: Vec<Fragment> = self
                .fragments(cells)?
                .filter(|x| lengths.accepts(x))
                .filter(|x| opts.blacklist.map_or(true, |bl| !bl.overlaps(x)))
                .collect();
            let total = fragments
                .iter()
                .filter(|x| {
                    !opts.exclude_for_norm.is_some_and(|s| s.overlaps(*x))
                        && opts.include_for_norm.map_or(true, |s| s.overlaps(*x))
                })
                .count() as u64;
            let track = BinTrack::accumulate(
                &index,
                fragments,
                LengthFilter::default(),
                opts.counting_strategy,
            );
            let values = match opts
                .normalization
                .scale_factor(total, opts.bin_size, &track)
            {
                Ok(factor) => track.scaled(factor),
                Err(e) => {
                    warn!("group {}: {}, emitting an empty track", group, e);
                    BTreeMap::new()
                }
            };
            let values = match opts.smooth_window {
                Some(window) => smooth(values, &index, window),
                None => values,
            };
            let bedgraph = make_bedgraph(&values, &index);

            let filename = group_file_name(dir, prefix, group, suffix);
            match format {
                CoverageOutputFormat::BedGraph => write_bedgraph(
                    &bedgraph,
                    &filename,
                    temp_dir,
                    compression,
                    compression_level,
                )?,
                CoverageOutputFormat::BigWig => write_bigwig(bedgraph, &index, &filename)?,
            }
            Ok(filename)
        })
    }
}

/// Assign each cell to its group, keeping only selected groups. Groups appear
/// in natural-sort order of their names.
fn group_cells<'a>(
    group_by: &[&'a str],
    selections: Option<&HashSet<&str>>,
) -> Vec<(&'a str, Vec<usize>)> {
    let mut groups: IndexMap<&str, Vec<usize>> = IndexMap::new();
    for (cell, &label) in group_by.iter().enumerate() {
        if selections.map_or(true, |s| s.contains(label)) {
            groups.entry(label).or_default().push(cell);
        }
    }
    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_by(|a, b| natord::compare(a.0, b.0));
    groups
}

/// Run one task per group on a dedicated pool. Failed groups are logged and
/// dropped from the result; the call errors only when every group failed.
fn run_group_tasks<F>(
    groups: Vec<(&str, Vec<usize>)>,
    num_threads: Option<usize>,
    task: F,
) -> Result<IndexMap<String, PathBuf>>
where
    F: Fn(&str, &[usize]) -> Result<PathBuf> + Send + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()?;
    let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)?;
    let results: Vec<_> = pool.install(|| {
        groups
            .par_iter()
            .progress_with_style(style)
            .map(|(group, cells)| match task(group, cells.as_slice()) {
                Ok(path) => Some((group.to_string(), path)),
                Err(e) => {
                    error!("group {} failed: {:#}", group, e);
                    None
                }
            })
            .collect()
    });
    let output: IndexMap<String, PathBuf> = results.into_iter().flatten().collect();
    ensure!(!output.is_empty(), "all {} groups failed", groups.len());
    Ok(output)
}

fn group_file_name(dir: &Path, prefix: &str, group: &str, suffix: &str) -> PathBuf {
    dir.join(prefix.to_string() + group.replace('/', "+").as_str() + suffix)
}

/// Convert sparse per-bin values into run-length-merged bedGraph records.
/// Zero bins are omitted.
fn make_bedgraph(values: &BTreeMap<usize, f64>, index: &GenomeBaseIndex) -> Vec<BedGraph<f32>> {
    let mut out: Vec<BedGraph<f32>> = Vec::new();
    for (&bin, &v) in values {
        let value = v as f32;
        if value == 0.0 {
            continue;
        }
        let region = index.get_region(bin);
        match out.last_mut() {
            Some(prev)
                if prev.value == value
                    && prev.chrom() == region.chrom()
                    && prev.end() == region.start() =>
            {
                prev.set_end(region.end());
            }
            _ => out.push(BedGraph::from_bed(&region, value)),
        }
    }
    out
}

/// Write bedGraph records to a staging file and move it into place, so a
/// failing task never leaves a partial output behind.
fn write_bedgraph(
    bedgraph: &[BedGraph<f32>],
    filename: &Path,
    temp_dir: Option<&Path>,
    compression: Option<Compression>,
    compression_level: Option<u32>,
) -> Result<()> {
    let staging = temp_dir
        .or_else(|| filename.parent())
        .unwrap_or(Path::new("."));
    let tmp = Builder::new().tempfile_in(staging).map_err(ExportError::Io)?;
    {
        let mut writer =
            encode_writer(tmp.reopen().map_err(ExportError::Io)?, compression, compression_level)?;
        for bed in bedgraph {
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                bed.chrom(),
                bed.start(),
                bed.end(),
                bed.value
            )
            .map_err(ExportError::Io)?;
        }
        writer.flush().map_err(ExportError::Io)?;
    }
    tmp.persist(filename).map_err(|e| ExportError::Io(e.error))?;
    Ok(())
}

/// Build a bigwig file from sorted bedGraph records.
fn write_bigwig(
    bedgraph: Vec<BedGraph<f32>>,
    index: &GenomeBaseIndex,
    filename: &Path,
) -> Result<()> {
    let chrom_sizes: HashMap<String, u32> = index
        .chrom_sizes()
        .map(|(k, v)| (k.to_string(), v as u32))
        .collect();
    let runtime = tokio::runtime::Runtime::new().map_err(ExportError::Io)?;
    BigWigWrite::create_file(filename.display().to_string())
        .write(
            chrom_sizes,
            BedParserStreamingIterator::new(
                BedParser::wrap_iter(bedgraph.into_iter().map(|x| {
                    let val = Value {
                        start: x.start() as u32,
                        end: x.end() as u32,
                        value: x.value,
                    };
                    let res: Result<_, bigtools::bed::bedparser::BedValueError> =
                        Ok((x.chrom().to_string(), val));
                    res
                })),
                false,
            ),
            runtime,
        )
        .map_err(|e| ExportError::Format(format!("failed to write bigwig file: {}", e)))?;
    Ok(())
}
