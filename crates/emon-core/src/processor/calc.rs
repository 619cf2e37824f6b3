//! Frequency and statistics calculations
//!
//! Powers are measured as cross products of current with the present voltage
//! (active) and with the voltage a quarter cycle earlier (reactive). The
//! lookback is a whole number of samples, so it is never exactly 90°: the
//! measured `<v(t)·v(t-k)> / <v²>` is how much active power bleeds into the
//! raw reactive product, and it is subtracted before the per-channel phase
//! rotation is applied.

use core::f32::consts::PI;

use libm::{cosf, fabsf, sinf, sqrtf};
use log::{debug, info, warn};

use super::{Processor, State};
use crate::config::{CHANNEL_COUNT, CURRENT_CHANNELS, Calibration};
use crate::pulse::PulseReport;
use crate::report::{ReportSink, channel_name};
use crate::sample::Sample;
use crate::sampler::SamplerControl;
use crate::stats::{rms, variance};

/// Last report times and the data carried between reports.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ReportSchedule {
    voltage_us: Option<u32>,
    power_us: Option<u32>,
    energy_us: Option<u32>,
    /// Sum of channel RMS currents at the last power report
    total_current: Option<f32>,
    /// Mains cycles and seconds since the last frequency report
    freq_cycles: u32,
    freq_secs: f32,
}

fn elapsed(since: Option<u32>, now_us: u32, period_us: u32) -> bool {
    since.is_none_or(|t| now_us.wrapping_sub(t) > period_us)
}

/// Samples spanning a quarter of the mains period, rounded to nearest.
pub fn quadrature_lookback(mains_period_us: u32, sample_period_us: u32) -> usize {
    if sample_period_us == 0 {
        return 0;
    }
    let mains = mains_period_us as u64;
    let sample = sample_period_us as u64;
    ((mains + 2 * sample) / (4 * sample)) as usize
}

/// Cosine and sine of each current channel's phase correction.
///
/// Current channel `j` is converted `j + 1` conversions after the voltage of
/// the same sample, which shows up as a phase lead proportional to the mains
/// frequency. The calibrated transformer phase offsets add to it.
pub fn phase_factors(
    calibration: &Calibration,
    sample_period_us: u32,
    mains_period_us: u32,
) -> ([f32; CURRENT_CHANNELS], [f32; CURRENT_CHANNELS]) {
    let mut cos_phase = [1.0; CURRENT_CHANNELS];
    let mut sin_phase = [0.0; CURRENT_CHANNELS];
    if mains_period_us == 0 {
        return (cos_phase, sin_phase);
    }

    let conversion_fraction =
        sample_period_us as f32 / CHANNEL_COUNT as f32 / mains_period_us as f32;
    for j in 0..CURRENT_CHANNELS {
        let ph = (calibration.voltage_phase_deg + calibration.current_phase_deg[j]).to_radians()
            + 2.0 * PI * (j + 1) as f32 * conversion_fraction;
        cos_phase[j] = cosf(ph);
        sin_phase[j] = sinf(ph);
    }
    (cos_phase, sin_phase)
}

impl Processor {
    pub(super) fn freq_calc<C: SamplerControl>(
        &mut self,
        start: u32,
        cycles: u16,
        sample: &Sample,
        sampler: &C,
    ) -> State {
        self.track_voltage(sample.voltage());

        let mains_period_us = sample.timestamp.wrapping_sub(start) / cycles.max(1) as u32;
        if self.sample_period_us == 0 || mains_period_us == 0 {
            warn!(
                "Cannot time mains (sample period {} us, mains period {} us), stabilizing again",
                self.sample_period_us, mains_period_us
            );
            return State::INITIAL;
        }
        self.mains_period_us = mains_period_us;
        info!("Mains period {} us", mains_period_us);

        let lookback = quadrature_lookback(mains_period_us, self.sample_period_us);
        let limit = self.history.capacity() - 1;
        if lookback > limit {
            warn!(
                "Quadrature lookback {} exceeds voltage history, using {}",
                lookback, limit
            );
        }
        self.lookback = lookback.min(limit);
        info!("Quadrature lookback {} samples", self.lookback);

        (self.cos_phase, self.sin_phase) =
            phase_factors(&self.calibration, self.sample_period_us, mains_period_us);

        sampler.reset_max_depth();
        State::StatAccum {
            start: None,
            cycles: 0,
        }
    }

    pub(super) fn stat_calc<C, S, P>(
        &mut self,
        start: u32,
        cycles: u16,
        sample: &Sample,
        sampler: &C,
        sink: &mut S,
        pulse: &P,
    ) -> State
    where
        C: SamplerControl,
        S: ReportSink,
        P: PulseReport,
    {
        let now = sample.timestamp;
        let policy = self.config.report;
        let inv_n = 1.0 / self.vstats.n.max(1) as f32;
        let window_secs = now.wrapping_sub(start) as f32 * 1.0e-6;
        let vcal = self.calibration.voltage_scale;
        let mut reported = false;

        // Mains voltage
        let vavg = self.vstats.sum as f32 * inv_n * vcal;
        let vavg_ra = self.v_avg.update(vavg);
        let vrms2 = variance(self.vstats.sum_sq as f32 * inv_n * vcal * vcal, vavg_ra);
        let vrms = sqrtf(vrms2);
        let half_swing = (self.vstats.max as f32 - self.vstats.min as f32) * vcal / 2.0;
        self.vstats.rms = vrms;
        self.vstats.active_power = half_swing;
        let crest_factor = if vrms > policy.min_crest_vrms {
            half_swing / vrms
        } else {
            1.0
        };

        self.schedule.freq_cycles += cycles as u32;
        self.schedule.freq_secs += window_secs;

        if self.mains_fprod == 0.0 {
            let fprod = (self.vstats.prod_lookback_sum as f32 * inv_n * vcal * vcal
                - vavg_ra * vavg_ra)
                / vrms2;
            if vrms2 > 0.0 && fprod.is_finite() {
                self.mains_fprod = fprod;
                info!("Quadrature correction factor {}", fprod);
                sink.push_float("vdel", fprod, 4, false);
                sink.push_break();
                reported = true;
            } else {
                warn!("No voltage swing, quadrature correction deferred");
            }
        }

        // Current transformers
        let mut total_current = 0.0;
        for j in 0..CURRENT_CHANNELS {
            let stats = &mut self.istats[j];
            if !stats.present {
                continue;
            }
            let ical = self.calibration.current_scale[j];

            let iavg = stats.sum as f32 * inv_n * ical;
            let iavg_ra = self.i_avg[j].update(iavg);
            let p_offset = vavg_ra * iavg_ra;

            let irms = rms(stats.sum_sq as f32 * inv_n * ical * ical, iavg_ra);
            stats.rms = irms;
            total_current += irms;

            let ivcal = inv_n * ical * vcal;
            let pac = stats.prod_sum as f32 * ivcal - p_offset;
            let pre = stats.prod_lookback_sum as f32 * ivcal - p_offset - self.mains_fprod * pac;

            // Positive reactive power for inductive loads
            stats.active_power = self.cos_phase[j] * pac - self.sin_phase[j] * pre;
            stats.reactive_power = self.sin_phase[j] * pac + self.cos_phase[j] * pre;

            self.energy.add(
                window_secs * stats.active_power,
                window_secs * stats.reactive_power,
            );
            debug!(
                "Channel {}: {} A, {} W, {} VAr",
                j, irms, stats.active_power, stats.reactive_power
            );
        }

        let voltage_due = elapsed(self.schedule.voltage_us, now, policy.voltage_period_us);
        let power_due = self
            .schedule
            .total_current
            .is_none_or(|old| fabsf(total_current - old) > policy.current_delta_amps)
            || elapsed(self.schedule.power_us, now, policy.power_period_us);

        if voltage_due || power_due {
            sink.push_float("vrms", vrms, 2, false);
            if self.schedule.freq_cycles > 0 && self.schedule.freq_secs > 0.0 {
                let frequency = self.schedule.freq_cycles as f32 / self.schedule.freq_secs;
                sink.push_float("vfrq", frequency, 3, false);
                self.schedule.freq_cycles = 0;
                self.schedule.freq_secs = 0.0;
            }
            sink.push_float("vcrs", crest_factor, 3, false);
            self.schedule.voltage_us = Some(now);
            reported = true;
        }

        if power_due {
            for (j, stats) in self.istats.iter().enumerate() {
                if !stats.present {
                    continue;
                }
                let apparent = stats.rms * vrms;
                let power_factor =
                    if apparent > policy.min_power_watts && apparent >= stats.active_power {
                        stats.active_power / apparent
                    } else {
                        1.0
                    };
                sink.push_float(&channel_name("irm", j), stats.rms, 3, false);
                sink.push_float(&channel_name("pac", j), stats.active_power, 1, false);
                sink.push_float(&channel_name("pre", j), stats.reactive_power, 1, false);
                sink.push_float(&channel_name("pow", j), power_factor, 4, false);
            }
            self.schedule.power_us = Some(now);
            self.schedule.total_current = Some(total_current);
        }

        if elapsed(self.schedule.energy_us, now, policy.energy_period_us) {
            let (active, reactive) = self.energy.snapshot();
            sink.push_int32("enac", active, true);
            sink.push_int32("enre", reactive, true);
            self.schedule.energy_us = Some(now);
            reported = true;
        }

        self.reset_stats();

        if reported {
            pulse.report_if_due(now, sink);
            sink.push_int32("adcd", sampler.max_depth() as i32, true);
            sink.push_int32("novr", sampler.overflow_count() as i32, true);
            sink.push_uint32("uptm", self.uptime.secs(), true);
            sink.push_break();
            sampler.reset_max_depth();
            sampler.reset_overflow_counter();
        }

        State::StatAccum {
            start: Some(now),
            cycles: 0,
        }
    }
}
