//! OpenDMTP client core.
//!
//! An embedded, always-on tracker engine: it samples a GPS receiver,
//! evaluates motion and geozone rules over the fix stream, encodes
//! detected occurrences as typed binary events, queues them under
//! priority, and ships them to a remote server over one of several
//! interchangeable transports while obeying a connection-accounting
//! policy.
//!
//! ## Configuration
//!
//! A small `config.toml` bootstraps the engine (serial ports, identity,
//! transport choice); everything else lives in the [`props`] property
//! store, persists across restarts, and is server-settable at runtime.
//! Please refer to the [`config`] module for further information.
//!
//! ## Launcher
//!
//! The project has a launcher in `src/main.rs`; `cargo run` starts the
//! tracker against the configuration in the working directory.

#![warn(clippy::all)]
#![forbid(anonymous_parameters)]
#![warn(
    variant_size_differences,
    unused_qualifications,
    unused_import_braces,
    trivial_numeric_casts,
    missing_docs,
    missing_copy_implementations,
    unused_extern_crates
)]

/// Configuration file.
pub const CONFIG_FILE: &str = "config.toml";

pub mod accounting;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod events;
pub mod geo;
pub mod geozone;
pub mod gps;
pub mod mainloop;
pub mod motion;
pub mod odometer;
pub mod packet;
pub mod props;
pub mod protocol;
pub mod queue;
pub mod status;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Error};
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::config::{TransportKind, CONFIG};
use crate::events::{EventAddFn, DEFAULT_EVENT_FORMAT};
use crate::packet::Priority;
use crate::props::{Key, PROPS};

/// Global run flag; cleared to stop every task.
pub static RUN: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(true)));

/// The main logic of the program. Builds the service stack in
/// dependency order (property store, accounting, event queue, GPS,
/// transport, protocol) and enters the main loop.
pub fn run() -> Result<(), Error> {
    // property store: load persisted values, then seed the read-only
    // bootstrap keys
    {
        let mut store = PROPS.lock().unwrap();
        store
            .load(CONFIG.props_file(), CONFIG.debug())
            .context(error::Init::Props)?;
    }
    seed_properties();
    register_commands();

    // accounting and the event queue are initialized on first touch;
    // force construction order anyway
    Lazy::force(&accounting::ACCOUNTING);
    Lazy::force(&events::EVENT_QUEUE);

    // geozone table
    {
        let mut store = PROPS.lock().unwrap();
        geozone::initialize(&mut store);
    }

    // GPS reader task
    let gps_handle = gps::spawn_reader(Arc::clone(&RUN)).context(error::Init::Gps)?;

    // primary transport and protocol driver
    let transport = transport::create_primary().context(error::Init::Transport)?;
    let serial_transport = CONFIG.transport().kind() == TransportKind::Serial;
    let protocol = protocol::Protocol::new(transport, 0);

    // the event-add closure injected into the rule engines
    let queue_event: EventAddFn =
        Arc::new(|priority, format, event| events::add_event_packet(priority, format, event));

    let mut main_loop =
        mainloop::MainLoop::new(protocol, queue_event, serial_transport, Arc::clone(&RUN));
    main_loop.run();

    // orderly shutdown: the run flag is already clear
    gps_handle
        .join()
        .map_err(|_| error::Init::Gps)
        .context("joining the GPS reader")?;
    Ok(())
}

/// Seeds bootstrap configuration into the read-only properties. Values
/// loaded from the persisted property file win over the comm seeds.
fn seed_properties() {
    let mut store = PROPS.lock().unwrap();
    let dev = CONFIG.device();
    store.set_string(props::PROP_STATE_ACCOUNT_ID, dev.account());
    store.set_string(props::PROP_STATE_DEVICE_ID, dev.device());
    store.set_string(props::PROP_STATE_FIRMWARE, dev.firmware());
    if let Some(unique) = codec::from_hex(dev.unique_id()) {
        if !unique.is_empty() {
            store.set_binary(props::PROP_STATE_UNIQUE_ID, &unique);
        }
    }

    store.set_string(
        props::PROP_CFG_GPS_PORT,
        &CONFIG.gps().uart().to_string_lossy(),
    );
    store.set_u32(props::PROP_CFG_GPS_BPS, CONFIG.gps().baud_rate());
    store.set_string(props::PROP_CFG_GPS_MODEL, CONFIG.gps().model());

    let xport = CONFIG.transport();
    match xport.kind() {
        TransportKind::File => {
            store.set_string(props::PROP_CFG_XPORT_PORT, xport.port());
        }
        TransportKind::Serial => {
            store.set_string(props::PROP_CFG_SERIAL0_PORT, xport.port());
            store.set_u32(props::PROP_CFG_SERIAL0_BPS, xport.baud_rate());
        }
        TransportKind::Gprs => {
            store.set_string(props::PROP_CFG_SERIAL1_PORT, xport.port());
            store.set_u32(props::PROP_CFG_SERIAL1_BPS, xport.baud_rate());
        }
        TransportKind::Socket => {}
    }

    let comm = CONFIG.comm();
    if !comm.host().is_empty() && store.get_string(props::PROP_COMM_HOST, "").is_empty() {
        store.set_string(props::PROP_COMM_HOST, comm.host());
        store.set_u32(props::PROP_COMM_PORT, u32::from(comm.port()));
    }

    // seeding is not a user change
    store.clear_changed();
}

/// Registers the command property handlers.
fn register_commands() {
    let mut store = PROPS.lock().unwrap();
    store.set_command(props::PROP_CMD_SAVE_PROPS, cmd_save_props);
    store.set_command(props::PROP_CMD_STATUS_EVENT, cmd_status_event);
    store.set_command(props::PROP_CMD_RESET, cmd_reset);
    store.set_command(props::PROP_CMD_GEOF_ADMIN, geozone::geozone_admin_cmd);
}

/// `cmd.saveprops`: persist the property file now.
fn cmd_save_props(_proto_ndx: usize, _key: Key, _data: &[u8]) -> u16 {
    match PROPS.lock().unwrap().save(CONFIG.props_file(), false) {
        Ok(()) => status::COMMAND_OK,
        Err(_) => status::COMMAND_EXECUTION,
    }
}

/// `cmd.status`: queue an event of the requested status code, stamped
/// with the latest fix.
fn cmd_status_event(_proto_ndx: usize, _key: Key, data: &[u8]) -> u16 {
    if data.len() < 2 {
        return status::COMMAND_ARGUMENTS;
    }
    let code = codec::read_uint(data, 2) as u16;
    if code == status::STATUS_NONE {
        return status::COMMAND_STATUS;
    }
    let now = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    let mut ev = event::Event {
        status_code: code,
        timestamp: now,
        ..event::Event::default()
    };
    if let Some(fix) = gps::GPS.latest() {
        ev.set_gps(&fix);
        ev.timestamp = now;
    }
    if events::add_event_packet(Priority::High, DEFAULT_EVENT_FORMAT, &ev) {
        status::COMMAND_OK_ACK
    } else {
        status::COMMAND_EXECUTION
    }
}

/// `cmd.reset`: stop the main loop; the hosting shell restarts us.
fn cmd_reset(_proto_ndx: usize, _key: Key, _data: &[u8]) -> u16 {
    warn!("Reset requested by server");
    RUN.store(false, Ordering::SeqCst);
    status::COMMAND_OK_ACK
}

/// Prints a stack trace of a complete system failure.
pub fn print_system_failure<S: AsRef<str>>(error: &Error, main_error: S) {
    use colored::Colorize;
    eprint!("{}", generate_error_string(error, main_error).red());
}

/// Generates a stack trace string of an error.
pub fn generate_error_string<S>(error: &Error, main_error: S) -> String
where
    S: AsRef<str>,
{
    let mut result = format!("{}:\n{}\n", main_error.as_ref(), error);

    for cause in error.chain().skip(1) {
        result.push_str(&format!("\tcaused by: {cause}\n"));
    }

    result
}

/// Logs a startup banner once the loggers are up.
pub fn log_banner() {
    info!(
        "OpenDMTP client {} starting (account={}, device={})",
        env!("CARGO_PKG_VERSION"),
        CONFIG.device().account(),
        CONFIG.device().device(),
    );
}

#[cfg(test)]
pub(crate) fn net_test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
