//! ## Candidate Selection
//!
//! The recovery heuristics all have the same shape: walk a table of candidates, score or
//! test each one against the image, and keep a winner.  These helpers are that loop, so the
//! callers only supply the table and the scoring function.

/// First candidate accepted by `test`, in table order.
pub fn first_accepted<'a,T,F>(candidates: &'a [T],mut test: F) -> Option<&'a T>
where F: FnMut(&T) -> bool {
    candidates.iter().find(|c| test(c))
}

/// Candidate with the highest score among those for which `score` returns `Some`.
/// Ties go to the earlier candidate.
pub fn best_candidate<'a,T,S,F>(candidates: &'a [T],mut score: F) -> Option<(&'a T,S)>
where S: PartialOrd + Copy, F: FnMut(&T) -> Option<S> {
    let mut ans: Option<(&'a T,S)> = None;
    for c in candidates {
        if let Some(s) = score(c) {
            match ans {
                Some((_,best)) if !(s > best) => {},
                _ => ans = Some((c,s))
            }
        }
    }
    ans
}

/// Like `best_candidate` but only scores at or above `threshold` count.
pub fn best_above<'a,T,S,F>(candidates: &'a [T],threshold: S,score: F) -> Option<(&'a T,S)>
where S: PartialOrd + Copy, F: FnMut(&T) -> Option<S> {
    best_candidate(candidates,score).filter(|(_,s)| *s >= threshold)
}
