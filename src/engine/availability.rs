use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::store::AppointmentStore;
use super::{Engine, EngineError};

// ── Availability Algorithm ────────────────────────────────────────

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

/// Slot buckets held by active appointments for `doctor_id`, clamped to `window`.
fn occupied_buckets(store: &AppointmentStore, doctor_id: &str, window: &Span) -> Vec<Span> {
    let width = store.slot_width();
    let first = window.start.div_euclid(width);
    let last = (window.end - 1).div_euclid(width);
    (first..=last)
        .map(|bucket| SlotKey {
            doctor_id: doctor_id.to_string(),
            bucket,
        })
        .filter(|key| store.slot_holder(key).is_some())
        .map(|key| {
            let span = key.span(width);
            Span::new(span.start.max(window.start), span.end.min(window.end))
        })
        .collect()
}

/// Free time for one doctor inside `window`. Occupied buckets are removed
/// whole, so every returned edge inside the window is bucket-aligned.
pub fn free_spans(store: &AppointmentStore, doctor_id: &str, window: &Span) -> Vec<Span> {
    let occupied = merge_overlapping(&occupied_buckets(store, doctor_id, window));
    subtract_intervals(&[*window], &occupied)
}

impl Engine {
    /// Point-in-time answer for one slot. Advisory only: reserving goes
    /// through `create_appointment`/`reschedule_appointment`, which re-check
    /// under the slot lock.
    pub fn check_availability(&self, doctor_id: &str, at: Ms) -> Availability {
        let key = SlotKey::new(doctor_id, at, self.store.slot_width());
        match self.store.slot_holder(&key) {
            Some(holder) => Availability::Conflict(holder),
            None => Availability::Available,
        }
    }

    pub fn free_slots(&self, doctor_id: &str, start: Ms, end: Ms) -> Result<Vec<Span>, EngineError> {
        if self.roster.get(doctor_id).is_none() {
            return Err(EngineError::DoctorNotFound(doctor_id.to_string()));
        }
        if end <= start {
            return Err(EngineError::Validation("window end must be after start".into()));
        }
        if end.checked_sub(start).is_none_or(|width| width > MAX_QUERY_WINDOW_MS) {
            return Err(EngineError::Validation("query window too wide".into()));
        }
        Ok(free_spans(&self.store, doctor_id, &Span::new(start, end)))
    }
}
