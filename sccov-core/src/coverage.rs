//! Per-group coverage signal: bin accumulation, normalization factors and
//! moving-average smoothing. A `BinTrack` is owned by exactly one group task
//! and only read after accumulation finishes.

use bed_utils::bed::BEDLike;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::ExportError;
use crate::fragment::{CountingStrategy, Fragment, LengthFilter};
use crate::genome::GenomeBaseIndex;

/// Sparse per-bin counts over the whole (binned) genome for one group.
/// Counts are u64 so deep datasets cannot overflow before normalization.
#[derive(Debug, Clone, Default)]
pub struct BinTrack {
    counts: BTreeMap<usize, u64>,
}

impl BinTrack {
    /// Accumulate a group's fragment stream into bin counts. Fragments
    /// failing the length bounds or mapping to chromosomes absent from the
    /// index are skipped; fragments running past the chromosome end are
    /// clipped to its last bin.
    pub fn accumulate<I>(
        index: &GenomeBaseIndex,
        fragments: I,
        lengths: LengthFilter,
        strategy: CountingStrategy,
    ) -> Self
    where
        I: IntoIterator<Item = Fragment>,
    {
        let mut counts = BTreeMap::new();
        for fragment in fragments {
            if !lengths.accepts(&fragment) {
                continue;
            }
            match strategy {
                CountingStrategy::Fragment => {
                    let Some(first) = index.bin_index(&fragment.chrom, fragment.start) else {
                        continue;
                    };
                    let last = index
                        .bin_index(&fragment.chrom, fragment.end - 1)
                        .unwrap_or(first);
                    for bin in first..=last {
                        *counts.entry(bin).or_insert(0) += 1;
                    }
                }
                CountingStrategy::Insertion => {
                    for site in fragment.to_insertions() {
                        if let Some(bin) = index.bin_index(site.chrom(), site.start()) {
                            *counts.entry(bin).or_insert(0) += 1;
                        }
                    }
                }
            }
        }
        Self { counts }
    }

    /// Sum of all raw bin counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn counts(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().map(|(&k, &v)| (k, v))
    }

    /// Scale the raw counts by a per-group factor, producing the values that
    /// go to the emitter.
    pub fn scaled(&self, factor: f64) -> BTreeMap<usize, f64> {
        self.counts
            .iter()
            .map(|(&k, &v)| (k, v as f64 * factor))
            .collect()
    }
}

/// Per-group scale factor methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    /// Reads per kilobase per million: `1e9 / (total * bin_size)`.
    #[default]
    RPKM,
    /// Counts per million: `1e6 / total`.
    CPM,
    /// Bins per million: `1e6 / sum(raw bin counts)`.
    BPM,
    /// No scaling.
    None,
}

impl FromStr for Normalization {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RPKM" => Ok(Normalization::RPKM),
            "CPM" => Ok(Normalization::CPM),
            "BPM" => Ok(Normalization::BPM),
            "NONE" => Ok(Normalization::None),
            _ => Err(ExportError::Config(format!(
                "normalization must be one of RPKM, CPM, BPM, None, got: {}",
                s
            ))),
        }
    }
}

impl Normalization {
    /// The multiplier applied to every raw bin count. `total` is the group's
    /// filtered read total; the track supplies the bin sum for BPM.
    pub fn scale_factor(
        &self,
        total: u64,
        bin_size: u64,
        track: &BinTrack,
    ) -> Result<f64, ExportError> {
        let checked = |denominator: f64| {
            if denominator == 0.0 {
                Err(ExportError::Compute(
                    "zero filtered read total".to_string(),
                ))
            } else {
                Ok(denominator)
            }
        };
        match self {
            Normalization::RPKM => Ok(1e9 / checked(total as f64 * bin_size as f64)?),
            Normalization::CPM => Ok(1e6 / checked(total as f64)?),
            Normalization::BPM => Ok(1e6 / checked(track.total() as f64)?),
            Normalization::None => Ok(1.0),
        }
    }
}

/// Centered moving average over `window_bp / bin_size` bins (forced odd,
/// >= 1), shrinking at chromosome edges. A window at or below the bin size
/// leaves the values untouched.
pub fn smooth(
    values: BTreeMap<usize, f64>,
    index: &GenomeBaseIndex,
    window_bp: u64,
) -> BTreeMap<usize, f64> {
    let step = index.step();
    if window_bp <= step {
        return values;
    }
    let mut n = ((window_bp as f64 / step as f64).round() as usize).max(1);
    if n % 2 == 0 {
        n += 1;
    }
    if n <= 1 {
        return values;
    }
    let half = n / 2;

    let mut out = BTreeMap::new();
    for (chrom, _) in index.chrom_sizes() {
        let range = index.bin_range(chrom).unwrap();
        let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
        for (&bin, &value) in values.range(range.clone()) {
            let lo = bin.saturating_sub(half).max(range.start);
            let hi = (bin + half).min(range.end - 1);
            for target in lo..=hi {
                *sums.entry(target).or_insert(0.0) += value;
            }
        }
        for (bin, sum) in sums {
            let lo = bin.saturating_sub(half).max(range.start);
            let hi = (bin + half).min(range.end - 1);
            out.insert(bin, sum / (hi - lo + 1) as f64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::ChromSizes;

    fn index(step: u64) -> GenomeBaseIndex {
        let sizes: ChromSizes = [("chr1", 1000u64), ("chr2", 95u64)].into_iter().collect();
        GenomeBaseIndex::new(&sizes).with_step(step)
    }

    #[test]
    fn test_accumulate_fragment_strategy() {
        let index = index(100);
        let fragments = vec![
            Fragment::new("chr1", 0, 50, "a"),
            Fragment::new("chr1", 90, 210, "a"),
            Fragment::new("chr2", 0, 10, "b"),
            Fragment::new("chrUn", 0, 10, "b"),
        ];
        let track = BinTrack::accumulate(
            &index,
            fragments,
            LengthFilter::default(),
            CountingStrategy::Fragment,
        );
        // the 90-210 fragment spans bins 0, 1 and 2 of chr1
        let counts: Vec<_> = track.counts().collect();
        assert_eq!(counts, vec![(0, 2), (1, 1), (2, 1), (10, 1)]);
        assert_eq!(track.total(), 5);
    }

    #[test]
    fn test_accumulate_insertion_strategy() {
        let index = index(100);
        let fragments = vec![Fragment::new("chr1", 50, 250, "a")];
        let track = BinTrack::accumulate(
            &index,
            fragments,
            LengthFilter::default(),
            CountingStrategy::Insertion,
        );
        // cut sites at 50 and 249, bins 0 and 2; nothing in between
        let counts: Vec<_> = track.counts().collect();
        assert_eq!(counts, vec![(0, 1), (2, 1)]);
    }

    #[test]
    fn test_accumulate_clips_past_chromosome_end() {
        let index = index(10);
        // chr2 is 95 bp, its last bin is index 109 (chr1 occupies 0..100)
        let fragments = vec![Fragment::new("chr2", 90, 300, "a")];
        let track = BinTrack::accumulate(
            &index,
            fragments,
            LengthFilter::default(),
            CountingStrategy::Fragment,
        );
        let counts: Vec<_> = track.counts().collect();
        assert_eq!(counts, vec![(109, 1)]);
    }

    #[test]
    fn test_accumulate_length_bounds() {
        let index = index(100);
        let fragments = vec![
            Fragment::new("chr1", 0, 100, "a"),
            Fragment::new("chr1", 0, 99, "a"),
        ];
        let track = BinTrack::accumulate(
            &index,
            fragments,
            LengthFilter::new(Some(100), None),
            CountingStrategy::Fragment,
        );
        assert_eq!(track.total(), 1);
    }

    #[test]
    fn test_scale_factors() {
        let index = index(100);
        let track = BinTrack::accumulate(
            &index,
            vec![Fragment::new("chr1", 0, 50, "a"); 4],
            LengthFilter::default(),
            CountingStrategy::Fragment,
        );

        let rpkm = Normalization::RPKM.scale_factor(2000, 100, &track).unwrap();
        assert!((rpkm - 1e9 / (2000.0 * 100.0)).abs() < 1e-9);
        let cpm = Normalization::CPM.scale_factor(2000, 100, &track).unwrap();
        assert!((cpm - 500.0).abs() < 1e-9);
        let bpm = Normalization::BPM.scale_factor(2000, 100, &track).unwrap();
        assert!((bpm - 1e6 / 4.0).abs() < 1e-9);
        assert_eq!(
            Normalization::None.scale_factor(0, 100, &track).unwrap(),
            1.0
        );

        assert!(matches!(
            Normalization::RPKM.scale_factor(0, 100, &track),
            Err(ExportError::Compute(_))
        ));
    }

    #[test]
    fn test_normalization_from_str() {
        assert_eq!("rpkm".parse::<Normalization>().unwrap(), Normalization::RPKM);
        assert_eq!("None".parse::<Normalization>().unwrap(), Normalization::None);
        assert!("tpm".parse::<Normalization>().is_err());
    }

    #[test]
    fn test_smoothing_window() {
        let sizes: ChromSizes = [("chr1", 5u64)].into_iter().collect();
        let index = GenomeBaseIndex::new(&sizes);
        let values: BTreeMap<usize, f64> = [(2, 3.0)].into_iter().collect();

        let smoothed = smooth(values.clone(), &index, 3);
        assert_eq!(
            smoothed,
            [(1, 1.0), (2, 1.0), (3, 1.0)].into_iter().collect()
        );

        // window at or below one bin is a no-op
        assert_eq!(smooth(values.clone(), &index, 1), values);
    }

    #[test]
    fn test_smoothing_shrinks_at_edges() {
        let sizes: ChromSizes = [("chr1", 5u64)].into_iter().collect();
        let index = GenomeBaseIndex::new(&sizes);
        let values: BTreeMap<usize, f64> = [(0, 3.0)].into_iter().collect();

        let smoothed = smooth(values, &index, 3);
        // bin 0 averages over the 2 bins that exist, bin 1 over 3
        assert_eq!(smoothed, [(0, 1.5), (1, 1.0)].into_iter().collect());
    }

    #[test]
    fn test_smoothing_respects_chromosome_boundaries() {
        let sizes: ChromSizes = [("chr1", 2u64), ("chr2", 2u64)].into_iter().collect();
        let index = GenomeBaseIndex::new(&sizes);
        // last bin of chr1 must not bleed into the first bin of chr2
        let values: BTreeMap<usize, f64> = [(1, 4.0)].into_iter().collect();

        let smoothed = smooth(values, &index, 3);
        assert_eq!(smoothed, [(0, 2.0), (1, 2.0)].into_iter().collect());
    }
}
