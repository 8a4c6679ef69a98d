//! GPRS modem transport.
//!
//! Drives an AT-command modem through the connect ladder: reset, echo
//! off, signal and registration checks, APN context, GPRS attach, then a
//! TCP or UDP link switched into transparent data mode. Persistent open
//! failures escalate to a modem hardware reset on a short timeout; any
//! prolonged stretch without connectivity triggers a long-timeout reset.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error;
use crate::props::{
    self, PROP_CFG_SERIAL1_BPS, PROP_CFG_SERIAL1_PORT, PROP_COMM_APN_NAME, PROP_COMM_APN_PASSWORD,
    PROP_COMM_APN_USER, PROP_COMM_HOST, PROP_COMM_MIN_SIGNAL, PROP_COMM_PORT,
};

use super::{read_framed, Transport, TransportMedia, TransportType};

/// Datagram buffer bound for simplex sessions.
const DATAGRAM_CAPACITY: usize = 2000;

/// Minimum acceptable +CSQ signal quality.
const MIN_SIGNAL_FLOOR: u32 = 2;

/// Open failures before the short-timeout hardware reset.
const RESET_FAILURE_COUNT: u32 = 3;

/// Seconds without any successful connection before the long-timeout
/// hardware reset.
const LONG_RESET_TIMEOUT: u32 = 1800;

/// Escape guard time around the `+++` sequence.
const ESCAPE_GUARD: Duration = Duration::from_millis(1100);

/// One exchange on the modem's command channel.
///
/// The modem terminates responses with CRLF and may interleave blank
/// lines; reads skip them.
struct AtLink<'a, S: Read + Write> {
    stream: &'a mut S,
}

impl<'a, S: Read + Write> AtLink<'a, S> {
    fn new(stream: &'a mut S) -> AtLink<'a, S> {
        AtLink { stream }
    }

    /// Sends a command terminated with CRLF.
    fn send_command(&mut self, command: &str) -> Result<(), error::Modem> {
        debug!("Sent command: `{command}\\r\\n`");
        self.stream
            .write_all(command.as_bytes())
            .and_then(|_| self.stream.write_all(b"\r\n"))
            .map_err(|_| error::Modem::NoSerial)
    }

    /// Reads one non-empty response line.
    fn read_line(&mut self) -> Result<String, error::Modem> {
        let mut line = Vec::new();
        loop {
            let mut byte = [0u8];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(error::Modem::NoResponse),
                Ok(_) => match byte[0] {
                    b'\r' => {}
                    b'\n' => {
                        if line.is_empty() {
                            continue;
                        }
                        let text = String::from_utf8_lossy(&line).into_owned();
                        debug!("Received: `{text}`");
                        return Ok(text);
                    }
                    b => {
                        if line.len() < 256 {
                            line.push(b);
                        }
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(error::Modem::PartialResponse {
                        response: String::from_utf8_lossy(&line).into_owned(),
                    })
                }
                Err(_) => return Err(error::Modem::NoSerial),
            }
        }
    }

    /// Sends a command and reads its first response line.
    fn send_command_read(&mut self, command: &str) -> Result<String, error::Modem> {
        self.send_command(command)?;
        self.read_line()
    }

    /// Sends a command and requires a plain `OK`.
    fn command_ok(&mut self, command: &str) -> Result<(), error::Modem> {
        let response = self.send_command_read(command)?;
        if response == "OK" {
            Ok(())
        } else {
            // some responses carry a value line before the OK
            let follow = self.read_line()?;
            if follow == "OK" {
                Ok(())
            } else {
                Err(error::Modem::NoResponse)
            }
        }
    }
}

/// Connection parameters resolved from the property store.
#[derive(Debug, Clone)]
struct DialPlan {
    host: String,
    port: u16,
    apn: String,
    apn_user: String,
    apn_password: String,
    min_signal: u32,
}

impl DialPlan {
    fn from_props() -> Result<DialPlan, error::Transport> {
        let host = props::get_string(PROP_COMM_HOST, "");
        let port = props::get_u32(PROP_COMM_PORT, 0) as u16;
        if host.is_empty() || port == 0 {
            error!("Transport host/port not specified");
            return Err(error::Transport::OpenFailed {
                reason: "host/port not configured".to_owned(),
            });
        }
        Ok(DialPlan {
            host,
            port,
            apn: props::get_string(PROP_COMM_APN_NAME, ""),
            apn_user: props::get_string(PROP_COMM_APN_USER, ""),
            apn_password: props::get_string(PROP_COMM_APN_PASSWORD, ""),
            min_signal: props::get_u32(PROP_COMM_MIN_SIGNAL, 7).max(MIN_SIGNAL_FLOOR),
        })
    }
}

/// Runs the connect ladder on the command channel. On success the modem
/// is left in transparent data mode.
fn negotiate<S: Read + Write>(
    stream: &mut S,
    kind: TransportType,
    plan: &DialPlan,
) -> Result<(), error::Modem> {
    let mut link = AtLink::new(stream);

    // soft reset and handshake
    let _ = link.send_command_read("ATZ");
    link.command_ok("AT")?;
    if link.send_command_read("ATE0")? != "OK" {
        // the echo of the ATE0 itself may come back once
        if link.read_line()? != "OK" {
            return Err(error::Modem::EchoOff);
        }
    }

    // signal quality: "+CSQ: <rssi>,<ber>"
    let csq = link.send_command_read("AT+CSQ")?;
    let rssi = csq
        .strip_prefix("+CSQ:")
        .and_then(|rest| rest.trim().split(',').next())
        .and_then(|v| v.trim().parse::<u32>().ok())
        .ok_or(error::Modem::NoResponse)?;
    let _ = link.read_line(); // trailing OK
    if rssi == 99 || rssi < plan.min_signal {
        return Err(error::Modem::Signal {
            csq: rssi.min(255) as u8,
            min: plan.min_signal.min(255) as u8,
        });
    }

    // network registration: home (1) or roaming (5)
    let creg = link.send_command_read("AT+CGREG?")?;
    let stat = creg
        .strip_prefix("+CGREG:")
        .and_then(|rest| rest.trim().split(',').nth(1))
        .and_then(|v| v.trim().parse::<u8>().ok())
        .ok_or(error::Modem::NoResponse)?;
    let _ = link.read_line(); // trailing OK
    if stat != 1 && stat != 5 {
        return Err(error::Modem::NotRegistered { stat });
    }

    // APN context and credentials
    if !plan.apn.is_empty() {
        link.command_ok(&format!(r#"AT+CGDCONT=1,"IP","{}""#, plan.apn))
            .map_err(|_| error::Modem::AttachFailed)?;
        if !plan.apn_user.is_empty() {
            let _ = link.command_ok(&format!(
                r#"AT+CGAUTH=1,1,"{}","{}""#,
                plan.apn_user, plan.apn_password
            ));
        }
    }

    // attach
    link.command_ok("AT+CGATT=1")
        .map_err(|_| error::Modem::AttachFailed)?;

    // open the link and enter data mode
    let proto = match kind {
        TransportType::Duplex => "TCP",
        _ => "UDP",
    };
    let start = format!(r#"AT+CIPSTART="{}","{}",{}"#, proto, plan.host, plan.port);
    let reply = link.send_command_read(&start)?;
    let connected = if reply == "OK" {
        // "CONNECT" / "CONNECT OK" follows the immediate OK
        matches!(link.read_line()?.as_str(), "CONNECT" | "CONNECT OK")
    } else {
        matches!(reply.as_str(), "CONNECT" | "CONNECT OK")
    };
    if !connected {
        return Err(error::Modem::ConnectFailed {
            host: plan.host.clone(),
            port: plan.port,
        });
    }
    Ok(())
}

/// GPRS modem transport.
pub struct GprsTransport {
    kind: TransportType,
    port: Option<Box<dyn tokio_serial::SerialPort>>,
    datagram: Vec<u8>,
    open_failures: u32,
    last_success: u32,
    last_reset: u32,
}

impl GprsTransport {
    /// Creates a closed GPRS transport.
    pub fn new() -> GprsTransport {
        GprsTransport {
            kind: TransportType::None,
            port: None,
            datagram: Vec::with_capacity(DATAGRAM_CAPACITY),
            open_failures: 0,
            last_success: 0,
            last_reset: 0,
        }
    }

    fn now() -> u32 {
        u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }

    fn open_modem_port(&mut self) -> Result<(), error::Transport> {
        if self.port.is_some() {
            return Ok(());
        }
        let port_name = props::get_string(PROP_CFG_SERIAL1_PORT, "");
        let baud = props::get_u32(PROP_CFG_SERIAL1_BPS, 115_200);
        if port_name.is_empty() {
            return Err(error::Transport::OpenFailed {
                reason: "modem port not configured".to_owned(),
            });
        }
        let port = tokio_serial::new(port_name.as_str(), baud)
            .timeout(Duration::from_secs(10))
            .open()
            .map_err(|e| error::Transport::OpenFailed {
                reason: format!("{port_name}: {e}"),
            })?;
        self.port = Some(port);
        Ok(())
    }

    /// Drops out of data mode back to the command channel.
    fn escape_data_mode(&mut self) {
        if let Some(port) = self.port.as_mut() {
            thread::sleep(ESCAPE_GUARD);
            let _ = port.write_all(b"+++");
            thread::sleep(ESCAPE_GUARD);
        }
    }

    /// Hardware reset: functional restart, then reopen the command
    /// channel from scratch.
    fn hardware_reset(&mut self) {
        warn!("Resetting GPRS modem");
        if let Some(port) = self.port.as_mut() {
            let mut link = AtLink::new(port);
            let _ = link.send_command("AT+CFUN=1,1");
        }
        self.port = None;
        self.open_failures = 0;
        self.last_reset = Self::now();
        thread::sleep(Duration::from_secs(5));
    }

    fn note_open_failure(&mut self) {
        self.open_failures += 1;
        let now = Self::now();
        if self.open_failures >= RESET_FAILURE_COUNT {
            // the port keeps refusing: short-timeout escalation
            self.hardware_reset();
        } else if self.last_success != 0
            && now.saturating_sub(self.last_success) > LONG_RESET_TIMEOUT
            && now.saturating_sub(self.last_reset) > LONG_RESET_TIMEOUT
        {
            // nothing has worked for a long time
            self.hardware_reset();
        }
    }
}

impl Default for GprsTransport {
    fn default() -> GprsTransport {
        GprsTransport::new()
    }
}

impl Transport for GprsTransport {
    fn media(&self) -> TransportMedia {
        TransportMedia::Gprs
    }

    fn is_open(&self) -> bool {
        self.kind != TransportType::None
    }

    fn open(&mut self, kind: TransportType) -> Result<(), error::Transport> {
        if self.is_open() {
            warn!("Transport seems to still be open!");
            let _ = self.close(false);
        }
        if kind == TransportType::None {
            return Err(error::Transport::Unsupported);
        }

        let plan = DialPlan::from_props()?;
        if let Err(e) = self.open_modem_port() {
            self.note_open_failure();
            return Err(e);
        }

        info!("Dialing {}:{} over GPRS", plan.host, plan.port);
        let Some(port) = self.port.as_mut() else {
            return Err(error::Transport::NotOpen);
        };
        match negotiate(port, kind, &plan) {
            Ok(()) => {
                self.kind = kind;
                self.datagram.clear();
                self.open_failures = 0;
                self.last_success = Self::now();
                debug!("Opened {} transport", kind.name());
                Ok(())
            }
            Err(e) => {
                warn!("GPRS connect failed: {e}");
                self.note_open_failure();
                Err(error::Transport::OpenFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn close(&mut self, send_udp: bool) -> Result<(), error::Transport> {
        if !self.is_open() {
            return Err(error::Transport::NotOpen);
        }
        debug!("{} transport close", self.kind.name());

        let mut result = Ok(());
        if send_udp && self.kind == TransportType::Simplex && !self.datagram.is_empty() {
            // the buffered datagram goes out while still in data mode
            if let Some(port) = self.port.as_mut() {
                if let Err(e) = port.write_all(&self.datagram) {
                    error!("GPRS datagram send failed: {e}");
                    result = Err(error::Transport::WriteFailed);
                }
            }
        }

        self.escape_data_mode();
        if let Some(port) = self.port.as_mut() {
            let mut link = AtLink::new(port);
            let _ = link.send_command_read("AT+CIPCLOSE");
        }
        self.kind = TransportType::None;
        self.datagram.clear();
        result
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, error::Transport> {
        if self.kind != TransportType::Duplex {
            error!("Cannot read from Simplex transport");
            return Err(error::Transport::Unsupported);
        }
        let Some(port) = self.port.as_mut() else {
            return Err(error::Transport::NotOpen);
        };
        read_framed(port, buf)
    }

    fn read_flush(&mut self) {
        if let Some(port) = self.port.as_mut() {
            let _ = port.clear(tokio_serial::ClearBuffer::Input);
        }
    }

    fn write_packet(&mut self, data: &[u8]) -> Result<usize, error::Transport> {
        if !self.is_open() {
            error!("Transport is not open");
            return Err(error::Transport::NotOpen);
        }
        if data.is_empty() {
            return Ok(0);
        }
        match self.kind {
            TransportType::Simplex => {
                if self.datagram.len() + data.len() > DATAGRAM_CAPACITY {
                    return Err(error::Transport::WriteFailed);
                }
                self.datagram.extend_from_slice(data);
                Ok(data.len())
            }
            TransportType::Duplex => {
                let port = self.port.as_mut().ok_or(error::Transport::NotOpen)?;
                port.write_all(data).map_err(|e| {
                    error!("GPRS write error: {e}");
                    error::Transport::WriteFailed
                })?;
                Ok(data.len())
            }
            TransportType::None => Err(error::Transport::NotOpen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted modem: canned response bytes in, commands recorded out.
    struct MockModem {
        input: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl MockModem {
        fn with_script(lines: &[&str]) -> MockModem {
            let mut input = VecDeque::new();
            for line in lines {
                input.extend(line.as_bytes());
                input.extend(b"\r\n");
            }
            MockModem {
                input,
                written: Vec::new(),
            }
        }

        fn commands(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl Read for MockModem {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.input.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Ok(0),
            }
        }
    }

    impl Write for MockModem {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn plan() -> DialPlan {
        DialPlan {
            host: "track.example.net".to_owned(),
            port: 31000,
            apn: "internet".to_owned(),
            apn_user: String::new(),
            apn_password: String::new(),
            min_signal: 2,
        }
    }

    /// The full ladder: reset, handshake, signal, registration, APN,
    /// attach, connect.
    #[test]
    fn negotiate_happy_path() {
        let mut modem = MockModem::with_script(&[
            "OK",          // ATZ
            "OK",          // AT
            "OK",          // ATE0
            "+CSQ: 17,0",  // AT+CSQ
            "OK",
            "+CGREG: 0,1", // AT+CGREG?
            "OK",
            "OK",          // AT+CGDCONT
            "OK",          // AT+CGATT=1
            "OK",          // AT+CIPSTART
            "CONNECT",
        ]);
        negotiate(&mut modem, TransportType::Duplex, &plan()).unwrap();
        let sent = modem.commands();
        assert!(sent.contains("AT+CSQ"));
        assert!(sent.contains("AT+CGREG?"));
        assert!(sent.contains(r#"AT+CGDCONT=1,"IP","internet""#));
        assert!(sent.contains("AT+CGATT=1"));
        assert!(sent.contains(r#"AT+CIPSTART="TCP","track.example.net",31000"#));
    }

    /// Signal below the floor aborts the ladder before dialing.
    #[test]
    fn negotiate_low_signal() {
        let mut modem = MockModem::with_script(&[
            "OK",         // ATZ
            "OK",         // AT
            "OK",         // ATE0
            "+CSQ: 1,0",  // AT+CSQ
            "OK",
        ]);
        let err = negotiate(&mut modem, TransportType::Duplex, &plan()).unwrap_err();
        assert!(matches!(err, error::Modem::Signal { csq: 1, .. }));
        assert!(!modem.commands().contains("AT+CIPSTART"));
    }

    /// Searching (+CGREG stat 2) is not registered.
    #[test]
    fn negotiate_not_registered() {
        let mut modem = MockModem::with_script(&[
            "OK",          // ATZ
            "OK",          // AT
            "OK",          // ATE0
            "+CSQ: 20,0",  // AT+CSQ
            "OK",
            "+CGREG: 0,2", // AT+CGREG?
            "OK",
        ]);
        let err = negotiate(&mut modem, TransportType::Duplex, &plan()).unwrap_err();
        assert!(matches!(err, error::Modem::NotRegistered { stat: 2 }));
    }

    /// Roaming (stat 5) is acceptable; UDP is dialed for simplex.
    #[test]
    fn negotiate_simplex_udp() {
        let mut modem = MockModem::with_script(&[
            "OK",
            "OK",
            "OK",
            "+CSQ: 20,0",
            "OK",
            "+CGREG: 0,5",
            "OK",
            "OK", // CGDCONT
            "OK", // CGATT
            "CONNECT",
        ]);
        negotiate(&mut modem, TransportType::Simplex, &plan()).unwrap();
        assert!(modem
            .commands()
            .contains(r#"AT+CIPSTART="UDP","track.example.net",31000"#));
    }
}
