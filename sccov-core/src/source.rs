//! Access to per-cell fragment data. The storage backend is abstracted behind
//! `FragmentSource`; worker tasks obtain independent read handles so that
//! concurrent per-group reads never interleave.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ExportError;
use crate::fragment::{CellBarcode, Fragment};
use crate::utils::open_file_for_read;

/// A read-only store of fragments indexed by cell.
///
/// Implementations must tolerate concurrent calls to `fragments` from
/// multiple threads; each call returns an iterator that is independent of
/// every other outstanding iterator.
pub trait FragmentSource: Sync {
    /// The dataset's own cell identifiers, in storage order.
    fn cell_ids(&self) -> &[CellBarcode];

    fn n_cells(&self) -> usize {
        self.cell_ids().len()
    }

    /// All fragments belonging to the given cells (indices into `cell_ids`),
    /// in an unspecified but deterministic order.
    fn fragments(&self, cells: &[usize]) -> Result<Box<dyn Iterator<Item = Fragment> + Send + '_>>;
}

/// An in-memory `FragmentSource`, either built directly from records or
/// loaded from a 10x-style fragment file.
#[derive(Debug, Clone, Default)]
pub struct MemoryFragmentSource {
    cells: Vec<CellBarcode>,
    fragments: Vec<Vec<Fragment>>,
}

impl MemoryFragmentSource {
    /// Build from a collection of fragments. Cells are registered in order of
    /// first appearance of their barcode.
    pub fn new<I: IntoIterator<Item = Fragment>>(fragments: I) -> Self {
        let mut by_cell: IndexMap<CellBarcode, Vec<Fragment>> = IndexMap::new();
        for fragment in fragments {
            by_cell
                .entry(fragment.barcode.clone())
                .or_default()
                .push(fragment);
        }
        let (cells, fragments) = by_cell.into_iter().unzip();
        Self { cells, fragments }
    }

    /// Read a fragment file (`chrom\tstart\tend\tbarcode\tcount[\tstrand]`,
    /// possibly gzip- or zstd-compressed). Lines starting with `#` are
    /// skipped.
    pub fn from_fragment_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(open_file_for_read(&path).with_context(|| {
            format!("cannot read fragment file: {}", path.as_ref().display())
        })?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(ExportError::Io)?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            records.push(line.parse::<Fragment>()?);
        }
        Ok(Self::new(records))
    }

    /// Index of the cell with the given barcode.
    pub fn cell_index(&self, barcode: &str) -> Option<usize> {
        self.cells.iter().position(|x| x == barcode)
    }
}

impl FragmentSource for MemoryFragmentSource {
    fn cell_ids(&self) -> &[CellBarcode] {
        &self.cells
    }

    fn fragments(&self, cells: &[usize]) -> Result<Box<dyn Iterator<Item = Fragment> + Send + '_>> {
        for &i in cells {
            if i >= self.fragments.len() {
                bail!("cell index out of bounds: {}", i);
            }
        }
        let cells = cells.to_vec();
        Ok(Box::new(
            cells
                .into_iter()
                .flat_map(move |i| self.fragments[i].iter().cloned()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> MemoryFragmentSource {
        MemoryFragmentSource::new([
            Fragment::new("chr1", 0, 50, "cellA"),
            Fragment::new("chr1", 100, 150, "cellB"),
            Fragment::new("chr2", 0, 10, "cellA"),
            Fragment::new("chr2", 20, 30, "cellC"),
        ])
    }

    #[test]
    fn test_cells_in_first_appearance_order() {
        let source = sample();
        assert_eq!(source.cell_ids(), &["cellA", "cellB", "cellC"]);
        assert_eq!(source.n_cells(), 3);
        assert_eq!(source.cell_index("cellC"), Some(2));
        assert_eq!(source.cell_index("cellD"), None);
    }

    #[test]
    fn test_fragments_by_cell_subset() {
        let source = sample();
        let frags: Vec<_> = source.fragments(&[0, 2]).unwrap().collect();
        assert_eq!(frags.len(), 3);
        assert!(frags.iter().all(|f| f.barcode == "cellA" || f.barcode == "cellC"));

        assert_eq!(source.fragments(&[]).unwrap().count(), 0);
        assert!(source.fragments(&[99]).is_err());
    }

    #[test]
    fn test_from_fragment_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragments.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# fragment file").unwrap();
        writeln!(f, "chr1\t0\t50\tcellA\t2").unwrap();
        writeln!(f, "chr1\t60\t80\tcellB\t1\t+").unwrap();
        drop(f);

        let source = MemoryFragmentSource::from_fragment_file(&path).unwrap();
        assert_eq!(source.cell_ids(), &["cellA", "cellB"]);
        let frags: Vec<_> = source.fragments(&[0, 1]).unwrap().collect();
        assert_eq!(frags[0].count, 2);
        assert_eq!(frags[1].strand, Some(bed_utils::bed::Strand::Forward));
    }
}
