//! Domain logic built on top of decoded protocol events.
//!
//! Nothing here touches a transport.  The session in `edb-monitor` feeds
//! events in and writes the results wherever the operator asked.
//!
//! - [`calibration`]: raw ADC counts and timer cycles to volts and seconds.
//! - [`correlator`]: pairs streamed time and data samples into records.
//! - [`records`]: binary capture, text capture and watchpoint CSV formats.

pub mod calibration;
pub mod correlator;
pub mod records;
