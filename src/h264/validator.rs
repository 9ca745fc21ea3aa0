//! Carve attempt over a chain of NAL units.
//!
//! Starting from the first unit that parses, units are appended while each
//! next one is found within the gap tolerance after the previous one. A
//! unit that fails to parse is skipped and the search continues one byte
//! further inside the window. Slices whose picture parameter set is
//! missing are kept as partial slices; if reference headers are available
//! their parameter sets are tried in turn.
//!
//! A finished chain is accepted when it contains a fully valid slice, a
//! valid SPS and PPS, or enough plausible slices.

use std::sync::Arc;

use crate::config::H264Config;
use crate::cursor::Cursor;
use crate::detector::ScanContext;
use crate::error::ParseResult;
use crate::h264::continuity::FirstMbHistory;
use crate::h264::framing::{NalFraming, UnitLocation, UnitLocator};
use crate::h264::nal::NalUnitType;
use crate::h264::reference::ReferenceHeader;
use crate::h264::slice::partial_is_plausible;
use crate::h264::state::ParameterSets;
use crate::h264::unit::{parse_unit, ParsedUnit, SliceDataDecoder, UnitPayload};
use crate::tree::HeaderTree;

const CANCEL_CHECK_INTERVAL: u64 = 64 * 1024;

/// Per-slice verdict kept for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRecord {
    pub first_mb_in_slice: u32,
    pub partial: bool,
    /// Fully resolved, every attribute in range, not a likely false hit.
    pub valid: bool,
    pub plausible: bool,
    pub false_hit: bool,
}

/// An accepted chain of units.
#[derive(Debug, Clone)]
pub struct CarvedStream {
    pub framing: NalFraming,
    pub start: u64,
    /// Exclusive, trailing zero bytes trimmed.
    pub end: u64,
    pub tree: HeaderTree<NalUnitType>,
    pub slices: Vec<SliceRecord>,
    pub reference: Option<Arc<ReferenceHeader>>,
}

/// State of one carve attempt.
struct CarveAttempt<'v> {
    config: &'v H264Config,
    decoder: &'v dyn SliceDataDecoder,
    framing: NalFraming,
    tree: HeaderTree<NalUnitType>,
    sets: ParameterSets,
    slices: Vec<SliceRecord>,
    history: FirstMbHistory,
    valid_sps: bool,
    valid_pps: bool,
    reference: Option<Arc<ReferenceHeader>>,
    reference_retries: u32,
    last: Option<UnitLocation>,
}

impl<'v> CarveAttempt<'v> {
    fn new(config: &'v H264Config, decoder: &'v dyn SliceDataDecoder, first: &UnitLocation) -> Self {
        Self {
            config,
            decoder,
            framing: first.framing,
            tree: HeaderTree::new(NalUnitType::Unspecified, first.offset),
            sets: ParameterSets::new(),
            slices: Vec::new(),
            history: FirstMbHistory::new(config.first_mb_history),
            valid_sps: false,
            valid_pps: false,
            reference: None,
            reference_retries: 0,
            last: None,
        }
    }

    /// Parse `loc` and link it. `Ok(false)` rejects the unit and leaves the
    /// attempt untouched.
    fn accept(&mut self, loc: UnitLocation, data: &[u8], ctx: &ScanContext<'_>) -> ParseResult<bool> {
        if let Some(prev) = self.last {
            let gap = loc.offset - prev.end;
            let prev_type = prev.header.unit_type;
            let next_type = loc.header.unit_type;
            let too_far = (prev_type == NalUnitType::Sps
                && next_type == NalUnitType::Pps
                && gap > self.config.max_gap_sps_to_pps)
                || (prev_type == NalUnitType::Pps && next_type.is_slice() && gap > self.config.max_gap_pps_to_slice);
            if too_far {
                tracing::trace!(offset = loc.offset, gap, "Parameter set gap exceeded");
                return Ok(false);
            }
        }

        let parsed = match parse_unit(&loc, data, &self.sets, self.decoder) {
            Ok(parsed) => parsed,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::trace!(offset = loc.offset, unit = %loc.header.unit_type, %err, "NAL unit rejected");
                return Ok(false);
            }
        };
        let parsed = if parsed.is_partial_slice() {
            self.resolve_with_reference(parsed, data, ctx)?
        } else {
            parsed
        };

        self.commit(parsed);
        self.last = Some(loc);
        Ok(true)
    }

    /// Retry a partial slice against each reference header of the same
    /// framing, within the retry budget.
    fn resolve_with_reference(
        &mut self,
        partial: ParsedUnit,
        data: &[u8],
        ctx: &ScanContext<'_>,
    ) -> ParseResult<ParsedUnit> {
        if self.reference.is_some() {
            return Ok(partial);
        }
        for reference in ctx.reference_headers.iter().filter(|r| r.framing() == self.framing) {
            if self.reference_retries >= self.config.max_reference_header_retries {
                break;
            }
            self.reference_retries += 1;
            let trial = reference.parameter_sets();
            match parse_unit(&partial.location, data, trial, self.decoder) {
                Ok(resolved) if !resolved.is_partial_slice() && resolved.is_valid() => {
                    tracing::debug!(
                        offset = partial.location.offset,
                        reference = reference.name(),
                        "Slice resolved with reference header"
                    );
                    self.sets = trial.clone();
                    self.reference = Some(Arc::clone(reference));
                    return Ok(resolved);
                }
                Ok(_) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::trace!(reference = reference.name(), %err, "Reference header does not fit");
                }
            }
        }
        Ok(partial)
    }

    fn commit(&mut self, parsed: ParsedUnit) {
        let node = parsed.to_node();
        let valid = node.valid;
        match parsed.payload {
            UnitPayload::Sps(sps) => {
                self.sets.insert_sequence(sps);
                self.valid_sps |= valid;
            }
            UnitPayload::Pps(pps) => {
                self.sets.insert_picture(pps);
                self.valid_pps |= valid;
            }
            UnitPayload::Slice(slice) => {
                let cfg = self.config;
                let continuous = self.history.push(slice.first_mb_in_slice);
                let partial = slice.is_partial();
                let false_hit = cfg.false_hit_reduction
                    && (!continuous || (partial && slice.pps_id > cfg.false_hit_pps_id_threshold));
                let plausible = if partial {
                    partial_is_plausible(&slice, cfg.false_hit_pps_id_threshold, cfg.max_first_mb_in_slice)
                } else {
                    valid
                };
                self.slices.push(SliceRecord {
                    first_mb_in_slice: slice.first_mb_in_slice,
                    partial,
                    valid: !partial && valid && !false_hit,
                    plausible,
                    false_hit,
                });
            }
            _ => {}
        }
        self.tree.link(node, HeaderTree::<NalUnitType>::ROOT);
    }

    /// Append units until the gap tolerance is exhausted.
    fn extend(&mut self, cursor: &Cursor<'_>, data: &[u8], locator: &UnitLocator<'_>, ctx: &ScanContext<'_>) -> ParseResult<()> {
        while let Some(last) = self.last {
            cursor.check_cancel()?;
            if last.header.unit_type == NalUnitType::EndOfStream {
                break;
            }
            let Some(window) =
                locator.search_window(data, last.end, self.framing, self.config.max_gap_between_nal_units)
            else {
                break;
            };
            let mut appended = false;
            for offset in window {
                if let Ok(Some(loc)) = locator.locate(data, offset, Some(self.framing)) {
                    if self.accept(loc, data, ctx)? {
                        appended = true;
                        break;
                    }
                }
            }
            if !appended {
                break;
            }
        }
        Ok(())
    }

    fn is_acceptable(&self) -> bool {
        let cfg = self.config;
        if self.tree.header_count() < cfg.min_headers_for_acceptance {
            return false;
        }
        if self.slices.iter().any(|s| s.valid) || (self.valid_sps && self.valid_pps) {
            return true;
        }
        let plausible = self.slices.iter().filter(|s| s.plausible).count();
        let flagged = self.slices.iter().any(|s| s.false_hit);
        plausible >= cfg.min_slices_for_acceptance
            || (plausible >= cfg.min_clean_slices_for_acceptance && !flagged)
    }

    fn finish(self, data: &[u8]) -> Option<CarvedStream> {
        let last = self.last?;
        if !self.is_acceptable() {
            tracing::trace!(
                offset = self.tree.root().offset,
                units = self.tree.header_count(),
                slices = self.slices.len(),
                "H.264 chain rejected"
            );
            return None;
        }
        let mut end = last.end;
        let floor = last.header_offset + 1;
        let mut trimmed = 0u64;
        while end > floor && data[end as usize - 1] == 0 && trimmed < self.config.max_trailing_zero_bytes {
            end -= 1;
            trimmed += 1;
        }
        Some(CarvedStream {
            framing: self.framing,
            start: self.tree.root().offset,
            end,
            tree: self.tree,
            slices: self.slices,
            reference: self.reference,
        })
    }
}

/// Runs carve attempts over a cursor.
pub struct StreamValidator<'v> {
    config: &'v H264Config,
    decoder: &'v dyn SliceDataDecoder,
}

impl<'v> StreamValidator<'v> {
    pub fn new(config: &'v H264Config, decoder: &'v dyn SliceDataDecoder) -> Self {
        Self { config, decoder }
    }

    /// Carve the next stream starting at or after the cursor and before
    /// `ctx.scan_limit`.
    ///
    /// On success the cursor is left at the stream end. A rejected chain
    /// leaves it one byte past the chain's first unit; when no unit is found
    /// it is left at the search limit.
    pub fn carve(&self, cursor: &mut Cursor<'_>, ctx: &ScanContext<'_>) -> ParseResult<Option<CarvedStream>> {
        let data = cursor.data();
        let locator = UnitLocator::new(self.config);
        let mut limit = ctx.scan_limit.min(data.len() as u64);
        if self.config.max_first_header_search > 0 {
            limit = limit.min(cursor.position().saturating_add(self.config.max_first_header_search));
        }

        let mut offset = cursor.position();
        while offset < limit {
            if offset % CANCEL_CHECK_INTERVAL == 0 {
                cursor.check_cancel()?;
            }
            let first = match locator.locate(data, offset, None) {
                Ok(Some(loc)) => loc,
                _ => {
                    offset += 1;
                    continue;
                }
            };

            let mut attempt = CarveAttempt::new(self.config, self.decoder, &first);
            if !attempt.accept(first, data, ctx)? {
                offset += 1;
                continue;
            }
            attempt.extend(cursor, data, &locator, ctx)?;

            return Ok(match attempt.finish(data) {
                Some(stream) => {
                    tracing::debug!(
                        start = stream.start,
                        end = stream.end,
                        units = stream.tree.header_count(),
                        framing = ?stream.framing,
                        "H.264 stream carved"
                    );
                    cursor.set_position(stream.end);
                    Some(stream)
                }
                None => {
                    cursor.set_position(first.offset + 1);
                    None
                }
            });
        }

        cursor.set_position(limit);
        Ok(None)
    }
}
