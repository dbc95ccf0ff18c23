// Acquisition - real-time side of the pipeline
//
// Architecture:
// - ring: bounded lock-free SPSC channel (rtrb) used for every hand-off
// - intake: one voltage ring per electrode channel plus drop counters
// - source: synthetic and WAV-backed acquisition sources
// - realtime: the paced producer thread that feeds the intake

pub mod intake;
pub mod realtime;
pub mod ring;
pub mod source;

pub use intake::{voltage_channels, IntakeCounters, VoltageIntake, VoltageTaps};
pub use realtime::{spawn_realtime_thread, Pacing, RealtimeLoop, RealtimeSummary};
pub use ring::{ring_channel, RingReceiver, RingSender};
pub use source::{AcquisitionSource, SyntheticConfig, SyntheticSource, WavSource};
