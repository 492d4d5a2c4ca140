//! Regulatory airtime accounting.
//!
//! Each sub-band of the region owns a budget of `window / duty_cycle` milliseconds of
//! airtime in any observation window of one hour. The window is rolling: every
//! transmission counts against the budget until an hour after it started. On top of
//! that the network can impose an aggregated duty cycle with DutyCycleReq, which
//! silences the device for `airtime * 2^n` after every transmission.

use core::marker::PhantomData;

use heapless::Vec;

use super::region::{Region, SubBand};

/// Length of the observation window in milliseconds.
pub const OBSERVATION_WINDOW_MS: u64 = 3_600_000;

const MAX_SUB_BANDS: usize = 8;
const MAX_RECORDS: usize = 32;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Error {
    /// The transmission is longer than the whole budget of its sub-band.
    AirtimeExceedsBudget { band: usize, airtime_ms: u32 },
}

/// Airtime granted at `start`.
#[derive(Debug, Clone, Copy)]
struct Record {
    start: u64,
    airtime_ms: u32,
}

impl Record {
    fn counts_at(&self, instant: u64) -> bool {
        self.start + OBSERVATION_WINDOW_MS > instant
    }
}

/// Grants of one sub-band, oldest first.
type BandLog = Vec<Record, MAX_RECORDS>;

/// Earliest instant at or after `from` when `airtime_ms` fits the rolling budget.
/// `from` must not lie before the last record.
fn earliest_in_band(log: &BandLog, budget: u64, airtime_ms: u32, from: u64) -> u64 {
    let live = || log.iter().filter(|record| record.counts_at(from));
    let used: u64 = live().map(|record| record.airtime_ms as u64).sum();
    let mut excess = (used + airtime_ms as u64).saturating_sub(budget);
    if excess == 0 {
        return from;
    }
    for record in live() {
        if record.airtime_ms as u64 >= excess {
            return record.start + OBSERVATION_WINDOW_MS;
        }
        excess -= record.airtime_ms as u64;
    }
    from
}

/// Per sub-band airtime bookkeeping for region `R`.
pub struct DutyCycle<R>
where
    R: Region,
{
    bands: [BandLog; MAX_SUB_BANDS],
    max_duty_cycle: u8,
    off_until: u64,
    region: PhantomData<R>,
}

impl<R> Default for DutyCycle<R>
where
    R: Region,
{
    fn default() -> Self {
        Self {
            bands: Default::default(),
            max_duty_cycle: 0,
            off_until: 0,
            region: PhantomData,
        }
    }
}

impl<R> DutyCycle<R>
where
    R: Region,
{
    fn band(index: usize) -> Option<&'static SubBand> {
        R::sub_bands().get(index).filter(|_| index < MAX_SUB_BANDS)
    }

    /// Set the aggregated duty cycle exponent from DutyCycleReq, 0 lifts the limit.
    pub fn set_max_duty_cycle(&mut self, max_duty_cycle: u8) {
        self.max_duty_cycle = max_duty_cycle.min(15);
    }

    /// Earliest instant at or after `now` when `airtime_ms` may be sent in `band`.
    /// Grants are ordered, so this is never before the last reservation in `band`.
    pub fn earliest_send_time(
        &self,
        band: Option<usize>,
        airtime_ms: u32,
        now: u64,
    ) -> Result<u64, Error> {
        let earliest = match band.and_then(|index| Self::band(index).map(|b| (index, b))) {
            Some((index, sub_band)) => {
                let budget = OBSERVATION_WINDOW_MS / sub_band.duty_cycle as u64;
                if airtime_ms as u64 > budget {
                    return Err(Error::AirtimeExceedsBudget { band: index, airtime_ms });
                }
                let log = &self.bands[index];
                let from = log.last().map_or(now, |last| last.start.max(now));
                earliest_in_band(log, budget, airtime_ms, from)
            }
            None => now,
        };
        Ok(earliest.max(self.off_until))
    }

    /// Reserve `airtime_ms` in `band` at the earliest legal instant and return it. The
    /// airtime is accounted before the caller transmits, so a second reservation can
    /// never be granted the same budget.
    pub fn reserve(&mut self, band: Option<usize>, airtime_ms: u32, now: u64) -> Result<u64, Error> {
        let at = self.earliest_send_time(band, airtime_ms, now)?;
        if let Some(index) = band.filter(|index| Self::band(*index).is_some()) {
            let log = &mut self.bands[index];
            log.retain(|record| record.counts_at(at));
            if log.is_full() {
                // fold the oldest grant into the next one, which ages out later
                let oldest = log.remove(0);
                log[0].airtime_ms += oldest.airtime_ms;
            }
            let _ = log.push(Record { start: at, airtime_ms });
            trace!("band {} holds {} grants in the last hour", index, log.len());
        }
        if self.max_duty_cycle > 0 {
            self.off_until = at + airtime_ms as u64 * (1u64 << self.max_duty_cycle);
        }
        Ok(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::region::eu868::EU868;
    use crate::mac::region::us915::US915;

    const G1: Option<usize> = Some(2);

    #[test]
    fn budget_of_one_percent_band_is_36_seconds() {
        let mut duty = DutyCycle::<EU868>::default();
        let mut now = 10;
        for _ in 0..36 {
            let at = duty.reserve(G1, 1000, now).unwrap();
            assert_eq!(at, now);
            now += 1000;
        }
        // 36 s used, the next one waits for the grant at t = 10 to age out
        let at = duty.reserve(G1, 1000, now).unwrap();
        assert_eq!(at, 10 + OBSERVATION_WINDOW_MS);
        // and the one after that for the grant at t = 1010
        assert_eq!(duty.earliest_send_time(G1, 1000, at).unwrap(), at + 1000);
    }

    #[test]
    fn bands_are_independent() {
        let mut duty = DutyCycle::<EU868>::default();
        duty.reserve(G1, 36_000, 0).unwrap();
        assert_eq!(duty.earliest_send_time(G1, 1, 5).unwrap(), OBSERVATION_WINDOW_MS);
        assert_eq!(duty.earliest_send_time(Some(4), 1, 5).unwrap(), 5);
    }

    #[test]
    fn reservation_is_atomic() {
        let mut duty = DutyCycle::<EU868>::default();
        let first = duty.reserve(G1, 30_000, 0).unwrap();
        let second = duty.reserve(G1, 30_000, 0).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, OBSERVATION_WINDOW_MS);
    }

    #[test]
    fn oversized_airtime_is_refused() {
        let duty = DutyCycle::<EU868>::default();
        // 0.1% band: 3.6 s
        assert!(duty.earliest_send_time(Some(0), 3_601, 0).is_err());
    }

    #[test]
    fn aggregated_duty_cycle_applies_everywhere() {
        let mut duty = DutyCycle::<US915>::default();
        assert_eq!(duty.reserve(None, 100, 0).unwrap(), 0);
        duty.set_max_duty_cycle(3);
        assert_eq!(duty.reserve(None, 100, 0).unwrap(), 0);
        assert_eq!(duty.earliest_send_time(None, 100, 10).unwrap(), 800);
        duty.set_max_duty_cycle(0);
        assert_eq!(duty.reserve(None, 100, 900).unwrap(), 900);
        assert_eq!(duty.earliest_send_time(None, 100, 950).unwrap(), 950);
    }

    #[test]
    fn window_rolls_across_the_hour() {
        let mut duty = DutyCycle::<EU868>::default();
        let mut grants = std::vec::Vec::new();
        grants.push((duty.reserve(G1, 1, 0).unwrap(), 1));
        let late = OBSERVATION_WINDOW_MS - 35_000;
        for _ in 0..35 {
            grants.push((duty.reserve(G1, 1000, late).unwrap(), 1000));
        }
        assert!(grants.iter().all(|&(at, _)| at <= late));
        let mut next_hour = std::vec::Vec::new();
        for _ in 0..36 {
            let at = duty.reserve(G1, 1000, OBSERVATION_WINDOW_MS).unwrap();
            next_hour.push(at);
            grants.push((at, 1000));
        }
        // a tumbling window would have granted all of them at the top of the hour
        assert!(next_hour.iter().filter(|&&at| at < late + OBSERVATION_WINDOW_MS).count() <= 1);
        for &(start, _) in &grants {
            let used: u64 = grants
                .iter()
                .filter(|&&(at, _)| at >= start && at < start + OBSERVATION_WINDOW_MS)
                .map(|&(_, airtime)| airtime)
                .sum();
            assert!(used <= 36_000, "{} ms in the hour from {}", used, start);
        }
    }

    #[test]
    fn grants_never_go_back_in_time() {
        let mut duty = DutyCycle::<EU868>::default();
        assert_eq!(duty.reserve(G1, 36_000, 0).unwrap(), 0);
        let next = duty.reserve(G1, 10, 5).unwrap();
        assert_eq!(next, OBSERVATION_WINDOW_MS);
        assert_eq!(duty.earliest_send_time(G1, 10, 6).unwrap(), OBSERVATION_WINDOW_MS);
    }
}
