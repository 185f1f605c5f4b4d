//! Fragment records and the counting strategies derived from them.

use bed_utils::bed::{BEDLike, GenomicRange, Score, Strand};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::str::FromStr;

use crate::error::ExportError;

pub type CellBarcode = String;

/// A sequenced fragment: a genomic interval, the cell it came from and a
/// duplicate count. Paired-end fragments have `strand: None`; single-end
/// reads carry the strand they aligned to.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub barcode: CellBarcode,
    pub count: u32,
    pub strand: Option<Strand>,
}

impl Fragment {
    pub fn new<S1, S2>(chrom: S1, start: u64, end: u64, barcode: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<CellBarcode>,
    {
        Self {
            chrom: chrom.into(),
            start,
            end,
            barcode: barcode.into(),
            count: 1,
            strand: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// The Tn5 insertion events of this fragment: both ends for paired-end
    /// data, the 5' end only for stranded single-end reads.
    pub fn to_insertions(&self) -> SmallVec<[GenomicRange; 2]> {
        match self.strand {
            None => smallvec![
                GenomicRange::new(self.chrom.clone(), self.start, self.start + 1),
                GenomicRange::new(self.chrom.clone(), self.end - 1, self.end),
            ],
            Some(Strand::Forward) => smallvec![GenomicRange::new(
                self.chrom.clone(),
                self.start,
                self.start + 1
            )],
            Some(Strand::Reverse) => smallvec![GenomicRange::new(
                self.chrom.clone(),
                self.end - 1,
                self.end
            )],
        }
    }
}

impl BEDLike for Fragment {
    fn chrom(&self) -> &str {
        &self.chrom
    }
    fn set_chrom(&mut self, chrom: &str) -> &mut Self {
        self.chrom = chrom.to_string();
        self
    }
    fn start(&self) -> u64 {
        self.start
    }
    fn set_start(&mut self, start: u64) -> &mut Self {
        self.start = start;
        self
    }
    fn end(&self) -> u64 {
        self.end
    }
    fn set_end(&mut self, end: u64) -> &mut Self {
        self.end = end;
        self
    }
    fn name(&self) -> Option<&str> {
        Some(&self.barcode)
    }
    fn score(&self) -> Option<Score> {
        None
    }
    fn strand(&self) -> Option<Strand> {
        self.strand
    }
}

impl FromStr for Fragment {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |field: &str| ExportError::Parse(format!("invalid {} in record: {}", field, s));
        let mut fields = s.split('\t');
        let chrom = fields.next().ok_or_else(|| err("chrom"))?.to_string();
        let start = fields
            .next()
            .and_then(|x| lexical::parse(x).ok())
            .ok_or_else(|| err("start"))?;
        let end = fields
            .next()
            .and_then(|x| lexical::parse(x).ok())
            .ok_or_else(|| err("end"))?;
        let barcode = fields.next().ok_or_else(|| err("barcode"))?.into();
        let count = match fields.next() {
            None => 1,
            Some(".") => 1,
            Some(x) => lexical::parse(x).map_err(|_| err("count"))?,
        };
        let strand = match fields.next() {
            None => None,
            Some(".") => None,
            Some(x) => Some(x.parse().map_err(|_| err("strand"))?),
        };
        if start >= end {
            return Err(err("interval"));
        }
        Ok(Fragment {
            chrom,
            start,
            end,
            barcode,
            count,
            strand,
        })
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.chrom, self.start, self.end, self.barcode, self.count
        )?;
        if let Some(strand) = self.strand {
            write!(f, "\t{}", strand)?;
        }
        Ok(())
    }
}

/// How a fragment contributes to the coverage signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountingStrategy {
    /// Every bin overlapped by the fragment interval is incremented once.
    Fragment,
    /// Only the bins containing the insertion events are incremented.
    Insertion,
}

impl FromStr for CountingStrategy {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fragment" => Ok(CountingStrategy::Fragment),
            "insertion" => Ok(CountingStrategy::Insertion),
            _ => Err(ExportError::Config(format!(
                "counting strategy must be 'fragment' or 'insertion', got: {}",
                s
            ))),
        }
    }
}

/// Inclusive fragment-length bounds. `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthFilter {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl LengthFilter {
    pub fn new(min: Option<u64>, max: Option<u64>) -> Self {
        Self { min, max }
    }

    pub fn accepts(&self, fragment: &Fragment) -> bool {
        let len = fragment.len();
        self.min.map_or(true, |m| len >= m) && self.max.map_or(true, |m| len <= m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment() {
        let frag: Fragment = "chr1\t100\t250\tAAACGG\t3".parse().unwrap();
        assert_eq!(frag.chrom, "chr1");
        assert_eq!(frag.start, 100);
        assert_eq!(frag.end, 250);
        assert_eq!(frag.barcode, "AAACGG");
        assert_eq!(frag.count, 3);
        assert_eq!(frag.strand, None);
        assert_eq!(frag.to_string(), "chr1\t100\t250\tAAACGG\t3");

        let frag: Fragment = "chr2\t5\t80\tTTTACT\t1\t-".parse().unwrap();
        assert_eq!(frag.strand, Some(Strand::Reverse));
        assert_eq!(frag.to_string(), "chr2\t5\t80\tTTTACT\t1\t-");

        let frag: Fragment = "chr1\t0\t10\tAAACGG".parse().unwrap();
        assert_eq!(frag.count, 1);

        assert!("chr1\t100".parse::<Fragment>().is_err());
        assert!("chr1\tx\t250\tAAACGG".parse::<Fragment>().is_err());
        assert!("chr1\t250\t100\tAAACGG".parse::<Fragment>().is_err());
    }

    #[test]
    fn test_to_insertions() {
        let mut frag = Fragment::new("chr1", 100, 250, "AAACGG");
        let sites = frag.to_insertions();
        assert_eq!(
            sites.as_slice(),
            &[
                GenomicRange::new("chr1", 100, 101),
                GenomicRange::new("chr1", 249, 250)
            ]
        );

        frag.strand = Some(Strand::Forward);
        assert_eq!(
            frag.to_insertions().as_slice(),
            &[GenomicRange::new("chr1", 100, 101)]
        );

        frag.strand = Some(Strand::Reverse);
        assert_eq!(
            frag.to_insertions().as_slice(),
            &[GenomicRange::new("chr1", 249, 250)]
        );
    }

    #[test]
    fn test_length_filter_bounds() {
        let frag = Fragment::new("chr1", 100, 200, "AAACGG");
        assert_eq!(frag.len(), 100);

        assert!(LengthFilter::new(Some(100), None).accepts(&frag));
        assert!(!LengthFilter::new(Some(101), None).accepts(&frag));
        assert!(LengthFilter::new(None, Some(100)).accepts(&frag));
        assert!(!LengthFilter::new(None, Some(99)).accepts(&frag));
        assert!(LengthFilter::default().accepts(&frag));
    }
}
