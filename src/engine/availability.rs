use crate::model::*;

// ── Overlap and free-time algorithms ──────────────────────────────

/// True if any existing interval intersects the candidate under half-open semantics.
///
/// This is the full symmetric test: a candidate that swallows an existing
/// interval whole counts, not only one whose endpoints fall inside it.
pub fn has_overlap<'a, I>(existing: I, candidate: &Span) -> bool
where
    I: IntoIterator<Item = &'a Span>,
{
    existing.into_iter().any(|s| s.overlaps(candidate))
}

/// Sub-ranges of `query` not covered by an active booking or a block.
pub fn free_spans(room: &RoomState, query: &Span) -> Vec<Span> {
    let mut occupied: Vec<Span> = room
        .active_bookings_overlapping(query)
        .map(|b| b.span)
        .chain(room.blocks_overlapping(query).map(|b| b.span))
        .map(|s| Span::new(s.start.max(query.start), s.end.min(query.end)))
        .collect();
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);
    subtract_intervals(&[*query], &occupied)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
