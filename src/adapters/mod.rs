//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements      | Connects to                    |
//! |------------|-----------------|--------------------------------|
//! | `csv_log`  | RunLogSink      | `experiment logs/*.csv`        |
//! | `log_sink` | EventSink       | `log` facade                   |
//! | `serial`   | PortOpener      | OS serial ports (`serialport`) |
//! | `store`    | ExperimentStore | `experiments.json`             |
//! | `time`     | Clock           | `std::time::Instant`           |

pub mod csv_log;
pub mod log_sink;
pub mod serial;
pub mod store;
pub mod time;
