//! Alignment of the packet-chunk borrows of two paths.

use crate::error::SynapseError;

/// A byte range of the packet borrowed by one merged borrow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Piece {
    pub offset: u32,
    pub len: u32,
}

impl Piece {
    pub fn end(&self) -> u32 {
        self.offset + self.len
    }
}

/// Borrows shared by both paths, followed by the tail of whichever path
/// borrows more.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    pub pieces: Vec<Piece>,
    /// Pieces emitted beyond each side's own borrow count.
    pub extra: [usize; 2],
}

fn boundaries(lengths: &[u32]) -> Vec<u32> {
    lengths
        .iter()
        .scan(0, |acc, l| {
            *acc += l;
            Some(*acc)
        })
        .collect()
}

/// Splits borrows so both sides see a chunk end at every offset where either
/// of them does. Once one side runs out of borrows at a shared boundary, the
/// other side's remaining borrows are kept as they are. Running out in the
/// middle of the other side's chunk cannot be reconciled.
pub fn align_chunks(first: &[u32], second: &[u32]) -> Result<ChunkLayout, SynapseError> {
    let (a, b) = (boundaries(first), boundaries(second));
    let (mut i, mut j) = (0, 0);
    let mut pos = 0;
    let mut pieces = vec![];
    fn push(pieces: &mut Vec<Piece>, pos: &mut u32, end: u32) {
        pieces.push(Piece {
            offset: *pos,
            len: end - *pos,
        });
        *pos = end;
    }
    loop {
        match (a.get(i), b.get(j)) {
            (None, None) => break,
            (Some(&x), Some(&y)) => {
                let end = x.min(y);
                push(&mut pieces, &mut pos, end);
                if x == end {
                    i += 1;
                }
                if y == end {
                    j += 1;
                }
            }
            (Some(&x), None) => {
                let started = if i == 0 { 0 } else { a[i - 1] };
                if started != pos {
                    return Err(SynapseError::ChunkMisalignment);
                }
                push(&mut pieces, &mut pos, x);
                i += 1;
            }
            (None, Some(&y)) => {
                let started = if j == 0 { 0 } else { b[j - 1] };
                if started != pos {
                    return Err(SynapseError::ChunkMisalignment);
                }
                push(&mut pieces, &mut pos, y);
                j += 1;
            }
        }
    }
    let extra = [extra(&pieces, first), extra(&pieces, second)];
    Ok(ChunkLayout { pieces, extra })
}

fn extra(pieces: &[Piece], lengths: &[u32]) -> usize {
    let end: u32 = lengths.iter().sum();
    pieces
        .iter()
        .filter(|p| p.end() <= end)
        .count()
        .saturating_sub(lengths.len())
}

#[cfg(test)]
mod tests {
    use crate::error::SynapseError;
    use crate::merge::chunks::{Piece, align_chunks};

    fn lens(pieces: &[Piece]) -> Vec<u32> {
        pieces.iter().map(|p| p.len).collect()
    }

    #[test]
    fn test_identical_layouts() {
        let layout = align_chunks(&[14, 20], &[14, 20]).unwrap();
        assert_eq!(lens(&layout.pieces), vec![14, 20]);
        assert_eq!(layout.extra, [0, 0]);
    }

    #[test]
    fn test_split_on_first_side() {
        let layout = align_chunks(&[14, 20], &[14, 6, 14]).unwrap();
        assert_eq!(lens(&layout.pieces), vec![14, 6, 14]);
        assert_eq!(layout.pieces[2].offset, 20);
        assert_eq!(layout.extra, [1, 0]);
    }

    #[test]
    fn test_longer_side_keeps_its_tail() {
        let layout = align_chunks(&[14], &[14, 20, 8]).unwrap();
        assert_eq!(lens(&layout.pieces), vec![14, 20, 8]);
        assert_eq!(layout.extra, [0, 0]);
        let layout = align_chunks(&[], &[14]).unwrap();
        assert_eq!(lens(&layout.pieces), vec![14]);
    }

    #[test]
    fn test_misaligned() {
        assert!(matches!(
            align_chunks(&[14, 20], &[14, 6]),
            Err(SynapseError::ChunkMisalignment)
        ));
    }
}
