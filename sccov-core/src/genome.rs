//! Genome layout: an ordered set of chromosomes and a fixed-width binning
//! scheme over it. Bin indices are global, 0-based, and assigned chromosome by
//! chromosome; the last bin of each chromosome may be shorter than the step.

use bed_utils::bed::GenomicRange;
use indexmap::{IndexMap, IndexSet};
use num::Integer;
use std::ops::Range;

/// Ordered chromosome (name, length) pairs.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChromSizes(IndexMap<String, u64>);

impl ChromSizes {
    pub fn total_size(&self) -> u64 {
        self.0.iter().map(|x| x.1).sum()
    }

    pub fn get(&self, chrom: &str) -> Option<u64> {
        self.0.get(chrom).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S> FromIterator<(S, u64)> for ChromSizes
where
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        ChromSizes(iter.into_iter().map(|(s, l)| (s.into(), l)).collect())
    }
}

impl<'a> IntoIterator for &'a ChromSizes {
    type Item = (&'a String, &'a u64);
    type IntoIter = indexmap::map::Iter<'a, String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for ChromSizes {
    type Item = (String, u64);
    type IntoIter = indexmap::map::IntoIter<String, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// 0-based index mapping genomic loci to fixed-width bins.
#[derive(Debug, Clone)]
pub struct GenomeBaseIndex {
    chroms: IndexSet<String>,
    base_accum_len: Vec<u64>,
    binned_accum_len: Vec<u64>,
    step: u64,
}

impl GenomeBaseIndex {
    pub fn new(chrom_sizes: &ChromSizes) -> Self {
        let mut acc = 0;
        let base_accum_len = chrom_sizes
            .into_iter()
            .map(|(_, length)| {
                acc += length;
                acc
            })
            .collect::<Vec<_>>();
        Self {
            chroms: chrom_sizes.into_iter().map(|x| x.0.clone()).collect(),
            binned_accum_len: base_accum_len.clone(),
            base_accum_len,
            step: 1,
        }
    }

    /// Re-bin the index with the given bin size.
    pub fn with_step(&self, s: u64) -> Self {
        let mut prev = 0;
        let mut acc_low_res = 0;
        let binned_accum_len = self
            .base_accum_len
            .iter()
            .map(|acc| {
                let length = acc - prev;
                prev = *acc;
                acc_low_res += Integer::div_ceil(&length, &s);
                acc_low_res
            })
            .collect();
        Self {
            chroms: self.chroms.clone(),
            base_accum_len: self.base_accum_len.clone(),
            binned_accum_len,
            step: s,
        }
    }

    /// The bin width in base pairs.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Total number of bins.
    pub fn num_bins(&self) -> usize {
        self.binned_accum_len
            .last()
            .map(|x| *x as usize)
            .unwrap_or(0)
    }

    pub fn contains_chrom(&self, chrom: &str) -> bool {
        self.chroms.contains(chrom)
    }

    pub fn chrom_sizes(&self) -> impl Iterator<Item = (&String, u64)> + '_ {
        let mut prev = 0;
        self.chroms
            .iter()
            .zip(self.base_accum_len.iter())
            .map(move |(chrom, acc)| {
                let length = acc - prev;
                prev = *acc;
                (chrom, length)
            })
    }

    /// Retrieve the range of bin indices covering a chromosome.
    pub fn bin_range(&self, chrom: &str) -> Option<Range<usize>> {
        let i = self.chroms.get_index_of(chrom)?;
        let end = self.binned_accum_len[i];
        let start = if i == 0 {
            0
        } else {
            self.binned_accum_len[i - 1]
        };
        Some(start as usize..end as usize)
    }

    /// Given a genomic position, return the index of the bin containing it.
    /// Positions beyond the end of the chromosome are clipped to its last bin;
    /// unknown chromosomes yield `None`.
    pub fn bin_index(&self, chrom: &str, pos: u64) -> Option<usize> {
        let i = self.chroms.get_index_of(chrom)?;
        let size = if i == 0 {
            self.base_accum_len[i]
        } else {
            self.base_accum_len[i] - self.base_accum_len[i - 1]
        };
        if size == 0 {
            return None;
        }
        let pos = pos.min(size - 1) / self.step;
        if i == 0 {
            Some(pos as usize)
        } else {
            Some((self.binned_accum_len[i - 1] + pos) as usize)
        }
    }

    /// O(log(N)). Given a bin index, return the genomic interval it covers.
    /// The last bin of a chromosome is truncated to the chromosome end.
    pub fn get_region(&self, bin: usize) -> GenomicRange {
        let i = bin as u64;
        match self.binned_accum_len.binary_search(&i) {
            Ok(j) => {
                let chr = self.chroms.get_index(j + 1).unwrap();
                let size = self.base_accum_len[j + 1] - self.base_accum_len[j];
                GenomicRange::new(chr, 0, self.step.min(size))
            }
            Err(j) => {
                let chr = self.chroms.get_index(j).unwrap();
                let (size, prev) = if j == 0 {
                    (self.base_accum_len[j], 0)
                } else {
                    (
                        self.base_accum_len[j] - self.base_accum_len[j - 1],
                        self.binned_accum_len[j - 1],
                    )
                };
                let start = (i - prev) * self.step;
                GenomicRange::new(chr, start, (start + self.step).min(size))
            }
        }
    }
}
