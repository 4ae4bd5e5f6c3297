//! Byte-pair merge over a single pre-tokenized piece.
//!
//! The piece starts as one part per byte. Each step merges the adjacent pair
//! whose concatenated bytes have the lowest rank, preferring the leftmost pair
//! when ranks tie, until no adjacent pair has a rank.
//!
//! Parts live in a flat-array doubly-linked list. Every node caches the rank of
//! merging itself with its successor, so a merge only refreshes the ranks of
//! the merged node and its predecessor instead of re-probing every pair.

use std::ops::Range;

use super::tokenizer::TokenizerError;
use super::vocab::{Rank, RankMap};

const NONE: usize = usize::MAX;

/// A part of the piece. Node `i` always starts at byte `i`; it ends where its
/// successor starts (or at the end of the piece).
struct Node {
    rank: Rank,
    prev: usize,
    next: usize,
}

#[inline]
fn part_end(nodes: &[Node], i: usize, len: usize) -> usize {
    match nodes[i].next {
        NONE => len,
        next => next,
    }
}

/// Rank of merging node `i` with its successor, `Rank::MAX` if there is none.
#[inline]
fn pair_rank(piece: &[u8], nodes: &[Node], i: usize, ranks: &RankMap) -> Rank {
    let j = nodes[i].next;
    if j == NONE {
        return Rank::MAX;
    }
    let end = part_end(nodes, j, piece.len());
    ranks.get(&piece[i..end]).unwrap_or(Rank::MAX)
}

/// Partition `piece` into the byte ranges produced by rank-ordered merging.
///
/// The result covers the piece contiguously and in order. Iteration count is
/// bounded by `piece.len() - 1`, whatever the vocabulary contains; pieces with
/// no ranked pairs come back as one range per byte.
pub fn byte_pair_merge(piece: &[u8], ranks: &RankMap) -> Vec<Range<usize>> {
    let n = piece.len();
    if n <= 1 {
        return (0..n).map(|i| i..i + 1).collect();
    }

    let mut nodes: Vec<Node> = (0..n)
        .map(|i| Node {
            rank: Rank::MAX,
            prev: if i > 0 { i - 1 } else { NONE },
            next: if i + 1 < n { i + 1 } else { NONE },
        })
        .collect();
    for i in 0..n - 1 {
        nodes[i].rank = pair_rank(piece, &nodes, i, ranks);
    }

    loop {
        // Strict `<` keeps the leftmost pair on equal ranks.
        let mut min_rank = (Rank::MAX, NONE);
        let mut cur = 0;
        while cur != NONE {
            if nodes[cur].rank < min_rank.0 {
                min_rank = (nodes[cur].rank, cur);
            }
            cur = nodes[cur].next;
        }

        if min_rank.0 == Rank::MAX {
            break;
        }

        let i = min_rank.1;
        let j = nodes[i].next;
        let j_next = nodes[j].next;
        nodes[i].next = j_next;
        if j_next != NONE {
            nodes[j_next].prev = i;
        }

        nodes[i].rank = pair_rank(piece, &nodes, i, ranks);
        let pred = nodes[i].prev;
        if pred != NONE {
            nodes[pred].rank = pair_rank(piece, &nodes, pred, ranks);
        }
    }

    let mut parts = Vec::new();
    let mut cur = 0;
    while cur != NONE {
        parts.push(cur..part_end(&nodes, cur, n));
        cur = nodes[cur].next;
    }
    parts
}

/// Encode one piece to ranks with byte-pair merging.
///
/// Every part the merge produces must have a rank; a part without one means
/// the vocabulary is incomplete and is reported as
/// [`TokenizerError::VocabularyGap`] instead of yielding a wrong id.
pub fn byte_pair_encode(piece: &[u8], ranks: &RankMap) -> Result<Vec<Rank>, TokenizerError> {
    if piece.len() == 1 {
        return match ranks.get(piece) {
            Some(rank) => Ok(vec![rank]),
            None => Err(TokenizerError::VocabularyGap {
                bytes: piece.to_vec(),
            }),
        };
    }

    byte_pair_merge(piece, ranks)
        .into_iter()
        .map(|range| {
            let bytes = &piece[range];
            ranks
                .get(bytes)
                .ok_or_else(|| TokenizerError::VocabularyGap {
                    bytes: bytes.to_vec(),
                })
        })
        .collect()
}

/// Split one piece into the byte slices its tokens cover.
pub fn byte_pair_split<'a>(piece: &'a [u8], ranks: &RankMap) -> Vec<&'a [u8]> {
    byte_pair_merge(piece, ranks)
        .into_iter()
        .map(|range| &piece[range])
        .collect()
}
