//! Interval sets for blacklist and include/exclude-for-normalization
//! filtering. A `RegionSet` is built once from literal locus strings or a BED
//! file and then queried many times, concurrently, read-only.

use anyhow::{Context, Result};
use bed_utils::bed::{BEDLike, GenomicRange};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ExportError;
use crate::utils::open_file_for_read;

/// Per-chromosome intervals sorted by start, with a running maximum of end
/// positions for binary-search-assisted overlap queries.
#[derive(Debug, Clone, Default)]
struct ChromIntervals {
    starts: Vec<u64>,
    ends: Vec<u64>,
    max_end: Vec<u64>,
}

impl ChromIntervals {
    fn build(mut intervals: Vec<(u64, u64)>) -> Self {
        intervals.sort_unstable();
        let (starts, ends): (Vec<_>, Vec<_>) = intervals.into_iter().unzip();
        let mut acc = 0;
        let max_end = ends
            .iter()
            .map(|&e| {
                acc = acc.max(e);
                acc
            })
            .collect();
        Self { starts, ends, max_end }
    }

    /// O(log n). True if any stored interval intersects [start, end).
    fn overlaps(&self, start: u64, end: u64) -> bool {
        let n = self.starts.partition_point(|&s| s < end);
        n > 0 && self.max_end[n - 1] > start
    }

    fn find(&self, start: u64, end: u64) -> impl Iterator<Item = (u64, u64)> + '_ {
        let n = self.starts.partition_point(|&s| s < end);
        self.starts[..n]
            .iter()
            .zip(&self.ends[..n])
            .filter(move |(_, &e)| e > start)
            .map(|(&s, &e)| (s, e))
    }
}

/// An immutable set of genomic intervals supporting overlap queries.
#[derive(Debug, Clone, Default)]
pub struct RegionSet {
    index: HashMap<String, ChromIntervals>,
    len: usize,
}

impl RegionSet {
    /// Parse literal locus strings of the form `chrom:start-end`.
    pub fn from_loci<'a, I>(loci: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        loci.into_iter().map(parse_locus).collect()
    }

    /// Read intervals from a BED file, possibly gzip- or zstd-compressed.
    /// Header lines (`#`, `track`, `browser`) are skipped.
    pub fn from_bed_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(
            open_file_for_read(&path)
                .with_context(|| format!("cannot read BED file: {}", path.as_ref().display()))?,
        );
        let mut regions = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(ExportError::Io)?;
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with("track")
                || line.starts_with("browser")
            {
                continue;
            }
            regions.push(parse_bed3(&line)?);
        }
        Ok(regions.into_iter().collect())
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if any stored interval intersects the query record.
    pub fn overlaps<B: BEDLike>(&self, query: &B) -> bool {
        self.index
            .get(query.chrom())
            .is_some_and(|c| c.overlaps(query.start(), query.end()))
    }

    /// All stored intervals intersecting the query, as `GenomicRange`s.
    pub fn find<B: BEDLike>(&self, query: &B) -> impl Iterator<Item = GenomicRange> + '_ {
        let chrom = query.chrom().to_string();
        let (start, end) = (query.start(), query.end());
        self.index
            .get(query.chrom())
            .into_iter()
            .flat_map(move |c| {
                let chrom = chrom.clone();
                c.find(start, end)
                    .map(move |(s, e)| GenomicRange::new(chrom.clone(), s, e))
                    .collect::<Vec<_>>()
            })
    }
}

impl FromIterator<GenomicRange> for RegionSet {
    fn from_iter<T: IntoIterator<Item = GenomicRange>>(iter: T) -> Self {
        let mut by_chrom: HashMap<String, Vec<(u64, u64)>> = HashMap::new();
        let mut len = 0;
        for region in iter {
            len += 1;
            by_chrom
                .entry(region.chrom().to_string())
                .or_default()
                .push((region.start(), region.end()));
        }
        let index = by_chrom
            .into_iter()
            .map(|(chrom, intervals)| (chrom, ChromIntervals::build(intervals)))
            .collect();
        Self { index, len }
    }
}

/// Convert a string such as "chr1:134-2222" to a `GenomicRange`.
pub fn parse_locus(txt: &str) -> Result<GenomicRange> {
    let err = || ExportError::Parse(format!("not a valid locus string: {}", txt));
    let (chrom, coords) = txt.split_once(':').ok_or_else(err)?;
    let (start, end) = coords.split_once('-').ok_or_else(err)?;
    let start: u64 = start.parse().map_err(|_| err())?;
    let end: u64 = end.parse().map_err(|_| err())?;
    if chrom.is_empty() || start >= end {
        return Err(err().into());
    }
    Ok(GenomicRange::new(chrom, start, end))
}

fn parse_bed3(line: &str) -> Result<GenomicRange> {
    let err = || ExportError::Parse(format!("not a valid BED record: {}", line));
    let mut fields = line.split('\t');
    let chrom = fields.next().ok_or_else(err)?;
    let start: u64 = fields.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let end: u64 = fields.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    if chrom.is_empty() || start >= end {
        return Err(err().into());
    }
    Ok(GenomicRange::new(chrom, start, end))
}
