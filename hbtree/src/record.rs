//! Heartbeat records.
//!
//! A [`Record`] is written into the ring buffer once per registration and
//! never modified afterwards. Besides the raw delta it carries nine derived
//! metrics: rate (work per second), accuracy rate (accuracy per second) and
//! power (energy per second), each over the node's lifetime, its sliding
//! window, and the single interval ending at this heartbeat.

use serde::{Deserialize, Serialize};

use crate::window::{Delta, Totals};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// A per-second metric over the three horizons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    /// Over the node's lifetime.
    #[serde(with = "float_repr")]
    pub global: f64,
    /// Over the node's sliding window.
    #[serde(with = "float_repr")]
    pub window: f64,
    /// Over the latest interval only.
    #[serde(with = "float_repr")]
    pub instant: f64,
}

impl Rates {
    /// Divides each horizon's amount by its duration in seconds.
    fn per_second(amounts: [f64; 3], seconds: [f64; 3]) -> Self {
        Self {
            global: amounts[0] / seconds[0],
            window: amounts[1] / seconds[1],
            instant: amounts[2] / seconds[2],
        }
    }
}

/// Snapshot of one registered heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: u64,
    shared_id: u64,
    user_tag: u64,
    timestamp: i64,
    work: u64,
    latency: i64,
    rate: Rates,
    #[serde(with = "float_repr")]
    accuracy: f64,
    accuracy_rate: Rates,
    #[serde(with = "float_repr")]
    energy: f64,
    power: Rates,
}

/// Serde encoding for metric values.
///
/// JSON has no NaN or infinity, so non-finite values are written as the
/// strings `"NaN"`, `"inf"` and `"-inf"`. Finite values stay plain numbers.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    #[allow(clippy::trivially_copy_pass_by_ref)] // serde's `with` passes a reference
    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid number '{text}'"))),
        }
    }
}

/// Identity of a heartbeat within its node and its tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BeatIds {
    pub(crate) id: u64,
    pub(crate) shared_id: u64,
    pub(crate) user_tag: u64,
}

impl Record {
    /// Builds the record for a heartbeat and derives its metrics.
    ///
    /// A zero latency (the bootstrap heartbeat, or two heartbeats on the
    /// same clock tick) yields all-zero metrics instead of dividing by zero.
    #[allow(clippy::cast_precision_loss)] // Rates are display-grade
    pub(crate) fn new(
        ids: BeatIds,
        timestamp: i64,
        delta: &Delta,
        global: &Totals,
        window: &Totals,
    ) -> Self {
        let (rate, accuracy_rate, power) = if delta.time == 0 {
            (Rates::default(), Rates::default(), Rates::default())
        } else {
            let seconds = [
                global.time as f64 / NANOS_PER_SECOND,
                window.time as f64 / NANOS_PER_SECOND,
                delta.time as f64 / NANOS_PER_SECOND,
            ];
            (
                Rates::per_second(
                    [global.work as f64, window.work as f64, delta.work as f64],
                    seconds,
                ),
                Rates::per_second([global.accuracy, window.accuracy, delta.accuracy], seconds),
                Rates::per_second([global.energy, window.energy, delta.energy], seconds),
            )
        };

        Self {
            id: ids.id,
            shared_id: ids.shared_id,
            user_tag: ids.user_tag,
            timestamp,
            work: delta.work,
            latency: delta.time,
            rate,
            accuracy: delta.accuracy,
            accuracy_rate,
            energy: delta.energy,
            power,
        }
    }

    /// Reassembles a record from logged fields, without re-deriving anything.
    pub(crate) fn from_parts(
        ids: BeatIds,
        timestamp: i64,
        delta: &Delta,
        rate: Rates,
        accuracy_rate: Rates,
        power: Rates,
    ) -> Self {
        Self {
            id: ids.id,
            shared_id: ids.shared_id,
            user_tag: ids.user_tag,
            timestamp,
            work: delta.work,
            latency: delta.time,
            rate,
            accuracy: delta.accuracy,
            accuracy_rate,
            energy: delta.energy,
            power,
        }
    }

    /// The delta this record contributed to its node's totals.
    pub(crate) fn delta(&self) -> Delta {
        Delta {
            time: self.latency,
            work: self.work,
            accuracy: self.accuracy,
            energy: self.energy,
        }
    }

    /// Position of this heartbeat among its node's heartbeats, from 0.
    pub fn beat_number(&self) -> u64 {
        self.id
    }

    /// Position of this heartbeat among all heartbeats of the tree, from 0.
    pub fn shared_beat_number(&self) -> u64 {
        self.shared_id
    }

    /// Caller-supplied tag.
    pub fn user_tag(&self) -> u64 {
        self.user_tag
    }

    /// When the heartbeat was registered, in nanoseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Work attributed to this heartbeat (0 for the bootstrap heartbeat).
    pub fn work(&self) -> u64 {
        self.work
    }

    /// Nanoseconds since the reference heartbeat.
    pub fn latency(&self) -> i64 {
        self.latency
    }

    /// Work per second over the three horizons.
    pub fn rates(&self) -> Rates {
        self.rate
    }

    /// Lifetime work per second.
    pub fn global_rate(&self) -> f64 {
        self.rate.global
    }

    /// Window work per second.
    pub fn window_rate(&self) -> f64 {
        self.rate.window
    }

    /// Work per second over the latest interval.
    pub fn instant_rate(&self) -> f64 {
        self.rate.instant
    }

    /// Accuracy attributed to this heartbeat (0 for the bootstrap heartbeat).
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    /// Accuracy per second over the three horizons.
    pub fn accuracy_rates(&self) -> Rates {
        self.accuracy_rate
    }

    /// Lifetime accuracy per second.
    pub fn global_accuracy(&self) -> f64 {
        self.accuracy_rate.global
    }

    /// Window accuracy per second.
    pub fn window_accuracy(&self) -> f64 {
        self.accuracy_rate.window
    }

    /// Accuracy per second over the latest interval.
    pub fn instant_accuracy(&self) -> f64 {
        self.accuracy_rate.instant
    }

    /// Energy consumed since the reference heartbeat.
    pub fn energy(&self) -> f64 {
        self.energy
    }

    /// Energy per second over the three horizons.
    pub fn powers(&self) -> Rates {
        self.power
    }

    /// Lifetime power.
    pub fn global_power(&self) -> f64 {
        self.power.global
    }

    /// Window power.
    pub fn window_power(&self) -> f64 {
        self.power.window
    }

    /// Power over the latest interval.
    pub fn instant_power(&self) -> f64 {
        self.power.instant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(id: u64) -> BeatIds {
        BeatIds {
            id,
            shared_id: id + 10,
            user_tag: 99,
        }
    }

    #[test]
    fn test_zero_latency_zeroes_every_metric() {
        let delta = Delta {
            time: 0,
            work: 5,
            accuracy: 1.0,
            energy: 3.0,
        };
        let totals = Totals {
            time: 1_000,
            work: 50,
            accuracy: 10.0,
            energy: 30.0,
        };

        let record = Record::new(ids(3), 7_000, &delta, &totals, &totals);
        assert_eq!(record.rates(), Rates::default());
        assert_eq!(record.accuracy_rates(), Rates::default());
        assert_eq!(record.powers(), Rates::default());
        assert_eq!(record.work(), 5);
        assert_eq!(record.timestamp(), 7_000);
    }

    #[test]
    fn test_metrics_are_per_second() {
        let delta = Delta {
            time: 500_000_000,
            work: 5,
            accuracy: 0.5,
            energy: 2.0,
        };
        let global = Totals {
            time: 4_000_000_000,
            work: 40,
            accuracy: 2.0,
            energy: 16.0,
        };
        let window = Totals {
            time: 2_000_000_000,
            work: 30,
            accuracy: 1.0,
            energy: 10.0,
        };

        let record = Record::new(ids(1), 0, &delta, &global, &window);
        assert_eq!(record.global_rate(), 10.0);
        assert_eq!(record.window_rate(), 15.0);
        assert_eq!(record.instant_rate(), 10.0);
        assert_eq!(record.global_accuracy(), 0.5);
        assert_eq!(record.window_accuracy(), 0.5);
        assert_eq!(record.instant_accuracy(), 1.0);
        assert_eq!(record.global_power(), 4.0);
        assert_eq!(record.window_power(), 5.0);
        assert_eq!(record.instant_power(), 4.0);
    }

    #[test]
    fn test_ids_and_delta() {
        let delta = Delta {
            time: 10,
            work: 2,
            accuracy: 0.25,
            energy: 1.5,
        };
        let record = Record::new(ids(4), 123, &delta, &Totals::default(), &Totals::default());
        assert_eq!(record.beat_number(), 4);
        assert_eq!(record.shared_beat_number(), 14);
        assert_eq!(record.user_tag(), 99);
        assert_eq!(record.latency(), 10);
        assert_eq!(record.delta(), delta);
    }

    #[test]
    fn test_default_record_is_zero() {
        let record = Record::default();
        assert_eq!(record.delta(), Delta::default());
        assert_eq!(record.global_rate(), 0.0);
    }

    #[test]
    fn test_non_finite_values_encode_as_strings() {
        let delta = Delta {
            time: 10,
            work: 1,
            accuracy: f64::NAN,
            energy: f64::INFINITY,
        };
        let record = Record::new(ids(2), 50, &delta, &Totals::default(), &Totals::default());

        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["accuracy"], "NaN");
        assert_eq!(json["energy"], "inf");
        assert_eq!(json["power"]["instant"], "inf");
        assert_eq!(json["work"], 1);

        let back: Record = serde_json::from_value(json).unwrap();
        assert!(back.delta().accuracy.is_nan());
        assert_eq!(back.delta().energy, f64::INFINITY);
        assert_eq!(back.instant_power(), f64::INFINITY);
        assert_eq!(back.latency(), 10);
    }

    #[test]
    fn test_unparseable_metric_text_is_rejected() {
        let mut json = serde_json::to_value(Record::default()).unwrap();
        json["energy"] = serde_json::Value::from("lots");
        assert!(serde_json::from_value::<Record>(json).is_err());
    }
}
