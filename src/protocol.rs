//! Protocol driver.
//!
//! Orchestrates one session at a time: decides duplex vs simplex from the
//! accounting policy, opens the transport, identifies the device, drains
//! the volatile/pending/event queues, interprets server packets, and
//! updates the accounting on close.

use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::accounting::Accounting;
use crate::codec;
use crate::error;
use crate::packet::{
    Encoding, Packet, Priority, PKT_CLIENT_ACCOUNT_ID, PKT_CLIENT_DEVICE_ID, PKT_CLIENT_DIAGNOSTIC,
    PKT_CLIENT_EOB_DONE, PKT_CLIENT_EOB_MORE, PKT_CLIENT_ERROR, PKT_CLIENT_UNIQUE_ID,
    PKT_SERVER_ACK, PKT_SERVER_EOT, PKT_SERVER_ERROR, PKT_SERVER_FILE_UPLOAD,
    PKT_SERVER_GET_PROPERTY, PKT_SERVER_SET_PROPERTY, SEQUENCE_ALL,
};
use crate::props::{
    self, PropStore, PROP_COMM_BYTES_READ, PROP_COMM_BYTES_WRITTEN, PROP_COMM_FIRST_BRIEF,
    PROP_COMM_MAX_DUP_EVENTS, PROP_COMM_MAX_SIM_EVENTS, PROP_COMM_SPEAK_FIRST,
    PROP_STATE_ACCOUNT_ID, PROP_STATE_DEVICE_ID, PROP_STATE_UNIQUE_ID,
};
use crate::queue::PacketQueue;
use crate::status::{
    ERROR_ACCOUNT_INVALID, ERROR_GPS_EXPIRED, ERROR_PACKET_ACK, ERROR_PACKET_LENGTH,
    ERROR_PACKET_TYPE, ERROR_UPLOAD_LENGTH, ERROR_UPLOAD_OFFSET, ERROR_UPLOAD_TYPE,
};
use crate::transport::{Transport, TransportType};

/// Hard cap on events per duplex session.
pub const MAX_DUPLEX_EVENTS: usize = 64;
/// Hard cap on events per simplex datagram.
pub const MAX_SIMPLEX_EVENTS: usize = 8;

/// Capacity of the per-session (volatile) queue.
const VOLATILE_QUEUE_SIZE: usize = 16;
/// Capacity of the cross-session (pending) queue.
const PENDING_QUEUE_SIZE: usize = 16;

/// Severe errors tolerated before the session is forced closed.
const MAX_SEVERE_ERRORS: u16 = 3;
/// Invalid-account reports tolerated before the session is forced closed.
const MAX_INVALID_ACCOUNT_ERRORS: u16 = 2;
/// Unrecognized packets tolerated before the session is forced closed.
const MAX_BAD_PACKET_ERRORS: u16 = 3;

/// Largest frame the driver will accept from a transport.
const READ_BUFFER_SIZE: usize = 600;

/// Which identification packets the next block must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendIdent {
    /// Identification not necessary or already sent.
    None,
    /// Send the packed unique ID.
    Unique,
    /// Send account and device ID strings.
    Account,
}

/// Per-instance protocol session state.
pub struct Protocol {
    transport: Box<dyn Transport>,
    proto_ndx: usize,
    is_primary: bool,

    /// Session-scoped packets (errors, diagnostics), cleared per session.
    pub volatile_queue: PacketQueue,
    /// Packets surviving across sessions (property replies, uploads).
    pub pending_queue: PacketQueue,

    send_identification: SendIdent,
    current_transport_type: TransportType,
    current_encoding: Encoding,
    session_encoding: Encoding,

    checksum_error_count: u16,
    invalid_acct_error_count: u16,
    severe_error_count: u16,
    total_severe_error_count: u16,

    speak_freely: bool,
    speak_freely_max_events: i32,
    relinquish_speak_freely: bool,
    speak_brief: bool,

    last_duplex_error_timer: u32,

    total_read_bytes: u32,
    total_write_bytes: u32,
    session_read_bytes: u32,
    session_write_bytes: u32,

    upload_offset: Option<u32>,
    upload_data: Vec<u8>,
}

impl Protocol {
    /// Creates the driver around a transport.
    pub fn new(transport: Box<dyn Transport>, proto_ndx: usize) -> Protocol {
        Protocol {
            transport,
            proto_ndx,
            is_primary: proto_ndx == 0,
            volatile_queue: PacketQueue::new(VOLATILE_QUEUE_SIZE),
            pending_queue: PacketQueue::new(PENDING_QUEUE_SIZE),
            send_identification: SendIdent::None,
            current_transport_type: TransportType::None,
            current_encoding: Encoding::Binary,
            session_encoding: Encoding::Binary,
            checksum_error_count: 0,
            invalid_acct_error_count: 0,
            severe_error_count: 0,
            total_severe_error_count: 0,
            speak_freely: false,
            speak_freely_max_events: -1,
            relinquish_speak_freely: false,
            speak_brief: false,
            last_duplex_error_timer: 0,
            total_read_bytes: 0,
            total_write_bytes: 0,
            session_read_bytes: 0,
            session_write_bytes: 0,
            upload_offset: None,
            upload_data: Vec::new(),
        }
    }

    /// Whether this is the primary protocol instance.
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Whether the transport currently holds an open session.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// The session type currently open.
    pub fn transport_type(&self) -> TransportType {
        self.current_transport_type
    }

    /// The encoding negotiated for the current session.
    pub fn encoding(&self) -> Encoding {
        self.current_encoding
    }

    /// The identification mode of the last block.
    pub fn ident_mode(&self) -> SendIdent {
        self.send_identification
    }

    /// Timer of the last failed duplex attempt.
    pub fn last_duplex_error(&self) -> u32 {
        self.last_duplex_error_timer
    }

    /// Total bytes read and written across all sessions.
    pub fn byte_counts(&self) -> (u32, u32) {
        (self.total_read_bytes, self.total_write_bytes)
    }

    /// Severe errors accumulated across sessions.
    pub fn total_severe_errors(&self) -> u16 {
        self.total_severe_error_count
    }

    /// Whether the server has granted speak-freely.
    pub fn is_speak_freely(&self) -> bool {
        self.speak_freely
    }

    /// Yields a speak-freely grant at the next opportunity.
    pub fn relinquish_speak_freely(&mut self) {
        self.relinquish_speak_freely = true;
    }

    /// Queues a client error packet (volatile: cleared per session).
    pub fn queue_error(&mut self, code: u16, args: &[u8]) -> bool {
        let mut payload = Vec::with_capacity(2 + args.len());
        codec::write_uint(&mut payload, u32::from(code), 2);
        payload.extend_from_slice(args);
        self.volatile_queue.add(&Packet::with_priority(
            PKT_CLIENT_ERROR,
            payload,
            Priority::High,
        ))
    }

    /// Queues a diagnostic packet (volatile).
    pub fn queue_diagnostic(&mut self, code: u16, args: &[u8]) -> bool {
        let mut payload = Vec::with_capacity(2 + args.len());
        codec::write_uint(&mut payload, u32::from(code), 2);
        payload.extend_from_slice(args);
        self.volatile_queue
            .add(&Packet::new(PKT_CLIENT_DIAGNOSTIC, payload))
    }

    /// Queues a packet that must survive until delivered (pending).
    pub fn queue_packet(&mut self, pkt: &Packet) -> bool {
        self.pending_queue.add(pkt)
    }

    /// Queues the one-shot stale-GPS error.
    pub fn queue_gps_expired(&mut self) -> bool {
        self.queue_error(ERROR_GPS_EXPIRED, &[])
    }

    fn write_pkt(&mut self, pkt: &Packet) -> Result<(), error::Transport> {
        let frame = pkt.encode(self.session_encoding);
        let n = self.transport.write_packet(&frame)?;
        self.session_write_bytes += n as u32;
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Packet, error::Transport> {
        let n = self.transport.read_packet(buf)?;
        self.session_read_bytes += n as u32;
        Packet::decode(&buf[..n])
    }

    /// Writes the identification block: the unique ID when configured,
    /// account + device strings otherwise.
    fn write_identification(&mut self, props: &Mutex<PropStore>) -> Result<(), error::Transport> {
        let (unique, account, device) = {
            let store = props.lock().unwrap();
            (
                store.get_binary(PROP_STATE_UNIQUE_ID).unwrap_or_default(),
                store.get_string(PROP_STATE_ACCOUNT_ID, ""),
                store.get_string(PROP_STATE_DEVICE_ID, ""),
            )
        };
        if !unique.is_empty() {
            self.send_identification = SendIdent::Unique;
            self.write_pkt(&Packet::new(PKT_CLIENT_UNIQUE_ID, unique))?;
        } else {
            self.send_identification = SendIdent::Account;
            self.write_pkt(&Packet::new(PKT_CLIENT_ACCOUNT_ID, account.into_bytes()))?;
            self.write_pkt(&Packet::new(PKT_CLIENT_DEVICE_ID, device.into_bytes()))?;
        }
        Ok(())
    }

    /// Declares every registered custom format to the server.
    fn send_custom_formats(&mut self) -> Result<(), error::Transport> {
        for pkt_type in crate::events::custom_format_types() {
            if let Some(pkt) = crate::events::format_def_packet(pkt_type) {
                self.write_pkt(&pkt)?;
            }
        }
        Ok(())
    }

    /// Drains the volatile queue (highest priority first), then the
    /// pending queue.
    fn send_queued(&mut self) -> Result<(), error::Transport> {
        for pkt in self.volatile_queue.take_unsent(usize::MAX) {
            self.write_pkt(&pkt)?;
        }
        for pkt in self.pending_queue.take_unsent(usize::MAX) {
            self.write_pkt(&pkt)?;
        }
        Ok(())
    }

    /// Sends up to `max` events and the end-of-block marker. A
    /// speak-freely grant may cap the block lower. Returns the number of
    /// events written.
    fn send_event_block(
        &mut self,
        events: &PacketQueue,
        mut max: usize,
    ) -> Result<usize, error::Transport> {
        if self.speak_freely && self.speak_freely_max_events >= 0 {
            max = max.min(self.speak_freely_max_events as usize);
        }
        let block = events.take_unsent(max);
        for pkt in &block {
            self.write_pkt(pkt)?;
        }
        let eob = if events.has_unsent() {
            PKT_CLIENT_EOB_MORE
        } else {
            PKT_CLIENT_EOB_DONE
        };
        self.write_pkt(&Packet::new(eob, Vec::new()))?;
        Ok(block.len())
    }

    fn note_severe_error(&mut self) -> bool {
        self.severe_error_count += 1;
        self.total_severe_error_count += 1;
        self.severe_error_count >= MAX_SEVERE_ERRORS
    }

    /// Handles a property get request: payload is the 2-byte key plus
    /// optional arguments.
    fn handle_get_property(
        &mut self,
        props: &Mutex<PropStore>,
        payload: &[u8],
    ) -> Result<(), error::Transport> {
        if payload.len() < 2 {
            self.queue_error(ERROR_PACKET_LENGTH, &[PKT_SERVER_GET_PROPERTY]);
            return Ok(());
        }
        let key = codec::read_uint(payload, 2) as u16;
        let reply = props.lock().unwrap().property_packet(key);
        match reply {
            Ok(pkt) => self.write_pkt(&pkt),
            Err(e) => {
                let mut args = Vec::with_capacity(6);
                codec::write_uint(&mut args, u32::from(key), 2);
                codec::write_uint(&mut args, e.code(), 4);
                let code = match e {
                    error::Prop::WriteOnly => crate::status::ERROR_PROPERTY_WRITE_ONLY,
                    error::Prop::InvalidKey => crate::status::ERROR_PROPERTY_INVALID_ID,
                    _ => crate::status::ERROR_PROPERTY_UNKNOWN_ERROR,
                };
                self.queue_error(code, &args);
                Ok(())
            }
        }
    }

    /// Handles a property set: payload is the 2-byte key plus the value.
    fn handle_set_property(&mut self, props: &Mutex<PropStore>, payload: &[u8]) {
        if payload.len() < 2 {
            self.queue_error(ERROR_PACKET_LENGTH, &[PKT_SERVER_SET_PROPERTY]);
            return;
        }
        let key = codec::read_uint(payload, 2) as u16;
        match props::set_value_dispatch(props, self.proto_ndx, key, &payload[2..]) {
            Ok(_) => {}
            Err(error::Prop::CommandError(code)) if code == crate::status::COMMAND_OK_ACK => {
                // the command wants a positive acknowledgement
                let mut args = Vec::with_capacity(2);
                codec::write_uint(&mut args, u32::from(key), 2);
                self.queue_diagnostic(code, &args);
            }
            Err(e) => {
                let mut args = Vec::with_capacity(6);
                codec::write_uint(&mut args, u32::from(key), 2);
                codec::write_uint(&mut args, e.code(), 4);
                let code = match e {
                    error::Prop::ReadOnly => crate::status::ERROR_PROPERTY_READ_ONLY,
                    error::Prop::WriteOnly => crate::status::ERROR_PROPERTY_WRITE_ONLY,
                    error::Prop::InvalidKey => crate::status::ERROR_PROPERTY_INVALID_ID,
                    error::Prop::InvalidLength | error::Prop::InvalidType => {
                        crate::status::ERROR_PROPERTY_INVALID_VALUE
                    }
                    error::Prop::CommandInvalid => crate::status::ERROR_COMMAND_INVALID,
                    error::Prop::CommandError(_) => crate::status::ERROR_COMMAND_ERROR,
                };
                self.queue_error(code, &args);
            }
        }
    }

    /// Handles one file-upload chunk: `[0x01]...` begins a transfer,
    /// `[0x02][offset u24][data...]` appends in order, `[0x03]` ends.
    fn handle_file_upload(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            self.queue_error(ERROR_UPLOAD_LENGTH, &[]);
            return;
        }
        match payload[0] {
            0x01 => {
                self.upload_offset = Some(0);
                self.upload_data.clear();
            }
            0x02 if payload.len() >= 4 => {
                let offset = codec::read_uint(&payload[1..], 3);
                match self.upload_offset {
                    Some(expect) if expect == offset => {
                        self.upload_data.extend_from_slice(&payload[4..]);
                        self.upload_offset = Some(offset + (payload.len() - 4) as u32);
                    }
                    Some(_) => {
                        self.queue_error(ERROR_UPLOAD_OFFSET, &payload[1..4]);
                        self.upload_offset = None;
                    }
                    None => {
                        self.queue_error(ERROR_UPLOAD_TYPE, &[0x02]);
                    }
                }
            }
            0x03 => {
                if self.upload_offset.take().is_some() {
                    info!("File upload complete: {} bytes", self.upload_data.len());
                }
            }
            other => {
                self.queue_error(ERROR_UPLOAD_TYPE, &[other]);
            }
        }
    }

    /// Runs the duplex read loop until EOT, an error threshold, or a
    /// transport failure.
    fn duplex_session(
        &mut self,
        props: &Mutex<PropStore>,
        events: &PacketQueue,
        max_events: usize,
    ) -> Result<(), error::Transport> {
        let speak_first = props.lock().unwrap().get_bool(PROP_COMM_SPEAK_FIRST, true);

        if speak_first {
            self.write_identification(props)?;
        }
        if self.speak_brief {
            // identification only; the server configures us first
            self.write_pkt(&Packet::new(PKT_CLIENT_EOB_DONE, Vec::new()))?;
        } else {
            self.send_custom_formats()?;
            self.send_queued()?;
            self.send_event_block(events, max_events)?;
        }

        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let pkt = match self.read_frame(&mut buf) {
                Ok(pkt) => pkt,
                Err(error::Transport::PeerClosed) => {
                    debug!("Server closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            match pkt.pkt_type {
                PKT_SERVER_ACK => {
                    let sequence = if pkt.payload.is_empty() {
                        SEQUENCE_ALL
                    } else {
                        codec::read_uint(&pkt.payload, pkt.payload.len())
                    };
                    if !events.acknowledge_to_sequence(sequence) {
                        self.queue_error(ERROR_PACKET_ACK, &pkt.payload);
                    }
                    // acknowledged through: delivered pending packets are done
                    self.pending_queue.acknowledge_to_sequence(SEQUENCE_ALL);
                    if events.has_unsent() && !self.speak_brief {
                        self.send_queued()?;
                        self.send_event_block(events, max_events)?;
                    }
                }
                PKT_SERVER_EOT => {
                    debug!("End of transmission");
                    if self.relinquish_speak_freely {
                        self.speak_freely = false;
                        self.relinquish_speak_freely = false;
                    }
                    return Ok(());
                }
                PKT_SERVER_GET_PROPERTY => {
                    self.handle_get_property(props, &pkt.payload)?;
                    // flush queued error replies in-session
                    self.send_queued()?;
                }
                PKT_SERVER_SET_PROPERTY => {
                    self.handle_set_property(props, &pkt.payload);
                    self.send_queued()?;
                }
                PKT_SERVER_FILE_UPLOAD => {
                    self.handle_file_upload(&pkt.payload);
                    self.send_queued()?;
                }
                PKT_SERVER_ERROR => {
                    let code = codec::read_uint(&pkt.payload, 2.min(pkt.payload.len())) as u16;
                    warn!("Server error {code:#06X}");
                    if code == ERROR_ACCOUNT_INVALID {
                        self.invalid_acct_error_count += 1;
                        if self.invalid_acct_error_count >= MAX_INVALID_ACCOUNT_ERRORS {
                            warn!("Account rejected, closing session");
                            return Ok(());
                        }
                    }
                    if self.note_severe_error() {
                        warn!("Severe error threshold reached, closing session");
                        return Ok(());
                    }
                }
                other => {
                    warn!("Unknown server packet type {other:#04X}");
                    self.queue_error(ERROR_PACKET_TYPE, &[other]);
                    self.checksum_error_count += 1;
                    if self.checksum_error_count >= MAX_BAD_PACKET_ERRORS {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Assembles the simplex datagram: identification, queued packets,
    /// up to `max_events` events.
    fn simplex_session(
        &mut self,
        props: &Mutex<PropStore>,
        events: &PacketQueue,
        max_events: usize,
    ) -> Result<(), error::Transport> {
        self.write_identification(props)?;
        self.send_custom_formats()?;
        self.send_queued()?;
        for pkt in events.take_unsent(max_events) {
            self.write_pkt(&pkt)?;
        }
        Ok(())
    }

    /// Decides whether a connection should be opened now, and of which
    /// type.
    fn decide(
        &self,
        props: &Mutex<PropStore>,
        acct: &Mutex<Accounting>,
        events: &PacketQueue,
        now: u32,
    ) -> TransportType {
        let media = self.transport.media();
        let has_events = events.has_unsent();
        let store = props.lock().unwrap();
        let mut acct = acct.lock().unwrap();

        let duplex_ok = has_events
            && Accounting::supports_duplex(&store, media)
            && acct.under_duplex_quota(&store, now, media)
            && acct.min_interval_expired(&store, now, media)
            && acct.absolute_delay_expired(&store, now, media);
        if duplex_ok || acct.max_interval_expired(&store, now, media) {
            return TransportType::Duplex;
        }

        let simplex_ok = has_events
            && Accounting::supports_simplex(&store, media)
            && acct.under_total_quota(&store, now, media)
            && acct.min_interval_expired(&store, now, media)
            && acct.absolute_delay_expired(&store, now, media);
        if simplex_ok {
            return TransportType::Simplex;
        }
        TransportType::None
    }

    /// One protocol pass: possibly opens a session, runs it to
    /// completion, and settles the accounting. Returns `true` when a
    /// session was attempted.
    pub fn transport_cycle(
        &mut self,
        props: &Mutex<PropStore>,
        acct: &Mutex<Accounting>,
        events: &PacketQueue,
        encoding: Encoding,
        now: u32,
    ) -> bool {
        let kind = self.decide(props, acct, events, now);
        if kind == TransportType::None {
            return false;
        }

        if let Err(e) = self.transport.open(kind) {
            warn!("Transport open failed: {e}");
            if kind == TransportType::Duplex {
                self.last_duplex_error_timer = now;
            }
            return false;
        }

        // session begin
        self.volatile_queue.reset();
        self.current_transport_type = kind;
        self.current_encoding = encoding;
        self.session_encoding = encoding;
        self.session_read_bytes = 0;
        self.session_write_bytes = 0;
        self.severe_error_count = 0;
        self.checksum_error_count = 0;
        self.invalid_acct_error_count = 0;
        self.speak_brief = props.lock().unwrap().get_bool(PROP_COMM_FIRST_BRIEF, false);

        let (max_dup, max_sim) = {
            let store = props.lock().unwrap();
            (
                (store.get_u32(PROP_COMM_MAX_DUP_EVENTS, 10) as usize).min(MAX_DUPLEX_EVENTS),
                (store.get_u32(PROP_COMM_MAX_SIM_EVENTS, 2) as usize).min(MAX_SIMPLEX_EVENTS),
            )
        };

        let session = match kind {
            TransportType::Duplex => self.duplex_session(props, events, max_dup),
            TransportType::Simplex => self.simplex_session(props, events, max_sim),
            TransportType::None => unreachable!("decided above"),
        };
        let ok = match session {
            Ok(()) => true,
            Err(e) => {
                warn!("Session aborted: {e}");
                if kind == TransportType::Duplex {
                    self.last_duplex_error_timer = now;
                }
                false
            }
        };

        let close_ok = self
            .transport
            .close(ok && kind == TransportType::Simplex)
            .is_ok();

        // settle accounting and byte counters
        {
            let store = props.lock().unwrap();
            let mut acct = acct.lock().unwrap();
            match kind {
                TransportType::Duplex => {
                    let _ = acct.mark_duplex(&store, now, self.transport.media());
                }
                TransportType::Simplex => {
                    let _ = acct.mark_simplex(&store, now, self.transport.media());
                }
                TransportType::None => {}
            }
        }
        self.total_read_bytes += self.session_read_bytes;
        self.total_write_bytes += self.session_write_bytes;
        {
            let mut store = props.lock().unwrap();
            store.add_u32(PROP_COMM_BYTES_READ, self.session_read_bytes);
            store.add_u32(PROP_COMM_BYTES_WRITTEN, self.session_write_bytes);
        }

        if kind == TransportType::Simplex {
            if ok && close_ok {
                // the datagram left as one UDP packet; sent events are done
                events.acknowledge_to_sequence(SEQUENCE_ALL);
                self.pending_queue.acknowledge_to_sequence(SEQUENCE_ALL);
            } else {
                events.reset_sent();
                self.pending_queue.reset_sent();
            }
        } else if !ok {
            // unacknowledged events go out again next session
            events.reset_sent();
            self.pending_queue.reset_sent();
        }

        self.current_transport_type = TransportType::None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::Accounting;
    use crate::error;
    use crate::event::Event;
    use crate::events::{encode_with_format, FIXED_FORMAT_STD};
    use crate::geo::GeoPoint;
    use crate::packet::{PKT_CLIENT_FIXED_FMT_STD, PKT_CLIENT_PROPERTY_VALUE};
    use crate::props::{
        PropStore, PROP_COMM_HOST, PROP_COMM_MIN_XMIT_DELAY, PROP_COMM_MIN_XMIT_RATE,
    };
    use crate::transport::TransportMedia;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted in-memory transport sharing its tape with the test.
    #[derive(Default)]
    struct MockState {
        reads: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
        opened: Vec<TransportType>,
        closed_with: Vec<bool>,
    }

    struct MockTransport {
        kind: TransportType,
        state: Arc<Mutex<MockState>>,
    }

    fn mock(reads: Vec<Vec<u8>>) -> (Box<dyn Transport>, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState {
            reads: reads.into(),
            ..MockState::default()
        }));
        (
            Box::new(MockTransport {
                kind: TransportType::None,
                state: Arc::clone(&state),
            }),
            state,
        )
    }

    impl Transport for MockTransport {
        fn media(&self) -> TransportMedia {
            TransportMedia::Socket
        }
        fn is_open(&self) -> bool {
            self.kind != TransportType::None
        }
        fn open(&mut self, kind: TransportType) -> Result<(), error::Transport> {
            self.kind = kind;
            self.state.lock().unwrap().opened.push(kind);
            Ok(())
        }
        fn close(&mut self, send_udp: bool) -> Result<(), error::Transport> {
            self.kind = TransportType::None;
            self.state.lock().unwrap().closed_with.push(send_udp);
            Ok(())
        }
        fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, error::Transport> {
            match self.state.lock().unwrap().reads.pop_front() {
                Some(frame) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                None => Err(error::Transport::PeerClosed),
            }
        }
        fn read_flush(&mut self) {}
        fn write_packet(&mut self, data: &[u8]) -> Result<usize, error::Transport> {
            self.state.lock().unwrap().written.push(data.to_vec());
            Ok(data.len())
        }
    }

    fn test_props() -> Mutex<PropStore> {
        let mut s = PropStore::with_defaults();
        s.set_string(PROP_STATE_ACCOUNT_ID, "acct");
        s.set_string(PROP_STATE_DEVICE_ID, "dev1");
        s.set_string(PROP_COMM_HOST, "localhost");
        s.set_u32(PROP_COMM_MIN_XMIT_DELAY, 0);
        s.set_u32(PROP_COMM_MIN_XMIT_RATE, 0);
        // plenty of quota for the scenarios
        s.set_u32_at(crate::props::PROP_COMM_MAX_CONNECTIONS, 0, 100);
        s.set_u32_at(crate::props::PROP_COMM_MAX_CONNECTIONS, 1, 50);
        Mutex::new(s)
    }

    fn queue_events(events: &PacketQueue, count: u32) {
        let mut seq = 0u32;
        for i in 0..count {
            let mut ev = Event::default();
            ev.status_code = crate::status::STATUS_LOCATION;
            ev.timestamp = 1_700_000_000 + i;
            ev.gps_point[0] = GeoPoint::new(37.0, -122.0);
            let pkt = encode_with_format(&FIXED_FORMAT_STD, Priority::Normal, &ev, &mut seq);
            events.add(&pkt);
        }
    }

    fn frame(pkt_type: u8, payload: Vec<u8>) -> Vec<u8> {
        Packet::new(pkt_type, payload).encode(Encoding::Binary)
    }

    /// Duplex scenario: three events queued, one pending property reply,
    /// speak-first. The session carries identification, the pending
    /// packet, the events and an EOB; the ACK of the last sequence
    /// empties the event queue.
    #[test]
    fn duplex_session_flow() {
        let props = test_props();
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(32);
        queue_events(&events, 3);
        let last_seq = events.last_sequence();

        let reads = vec![
            frame(PKT_SERVER_ACK, vec![last_seq as u8]),
            frame(PKT_SERVER_EOT, Vec::new()),
        ];
        let (xport, state) = mock(reads);
        let mut proto = Protocol::new(xport, 0);
        // one pending property reply survives from an earlier session
        let reply = props.lock().unwrap().property_packet(PROP_COMM_HOST).unwrap();
        proto.queue_packet(&reply);

        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));

        // all three events acknowledged away
        assert!(events.is_empty());
        assert!(proto.pending_queue.is_empty());

        let st = state.lock().unwrap();
        // format declarations from other components may interleave
        let types: Vec<u8> = st
            .written
            .iter()
            .map(|f| f[1])
            .filter(|&t| t != crate::packet::PKT_CLIENT_FORMAT_DEF_24)
            .collect();
        // ident (account + device), pending property, 3 events, EOB-done
        assert_eq!(
            types,
            vec![
                PKT_CLIENT_ACCOUNT_ID,
                PKT_CLIENT_DEVICE_ID,
                PKT_CLIENT_PROPERTY_VALUE,
                PKT_CLIENT_FIXED_FMT_STD,
                PKT_CLIENT_FIXED_FMT_STD,
                PKT_CLIENT_FIXED_FMT_STD,
                PKT_CLIENT_EOB_DONE,
            ]
        );
        assert_eq!(st.opened, vec![TransportType::Duplex]);
    }

    /// Simplex scenario: five events queued with a three-event cap. One
    /// datagram carries ident + three events; two events remain queued.
    #[test]
    fn simplex_datagram_flow() {
        let props = test_props();
        {
            let mut s = props.lock().unwrap();
            // no duplex support: force the simplex path
            s.set_u32(PROP_COMM_MAX_DUP_EVENTS, 0);
            s.set_u32(PROP_COMM_MAX_SIM_EVENTS, 3);
        }
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(32);
        queue_events(&events, 5);

        let (xport, state) = mock(Vec::new());
        let mut proto = Protocol::new(xport, 0);
        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));

        // three shipped, two remain
        assert_eq!(events.len(), 2);
        assert!(events.has_unsent());

        let st = state.lock().unwrap();
        assert_eq!(st.opened, vec![TransportType::Simplex]);
        assert_eq!(st.closed_with, vec![true]);
        let types: Vec<u8> = st
            .written
            .iter()
            .map(|f| f[1])
            .filter(|&t| t != crate::packet::PKT_CLIENT_FORMAT_DEF_24)
            .collect();
        assert_eq!(
            types,
            vec![
                PKT_CLIENT_ACCOUNT_ID,
                PKT_CLIENT_DEVICE_ID,
                PKT_CLIENT_FIXED_FMT_STD,
                PKT_CLIENT_FIXED_FMT_STD,
                PKT_CLIENT_FIXED_FMT_STD,
            ]
        );
    }

    /// No events queued: no connection is opened.
    #[test]
    fn idle_no_connection() {
        let props = test_props();
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(8);
        let (xport, state) = mock(Vec::new());
        let mut proto = Protocol::new(xport, 0);
        assert!(!proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));
        assert!(state.lock().unwrap().opened.is_empty());
    }

    /// A server property-set lands in the store; a read-only target
    /// queues a property error instead.
    #[test]
    fn server_property_set() {
        let props = test_props();
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(8);
        queue_events(&events, 1);

        let mut set_payload = Vec::new();
        codec::write_uint(&mut set_payload, u32::from(crate::props::PROP_COMM_PORT), 2);
        set_payload.extend_from_slice(&[0x79, 0x18]); // 31000

        let mut ro_payload = Vec::new();
        codec::write_uint(&mut ro_payload, u32::from(PROP_STATE_ACCOUNT_ID), 2);
        ro_payload.extend_from_slice(b"nope");

        let reads = vec![
            frame(PKT_SERVER_SET_PROPERTY, set_payload),
            frame(PKT_SERVER_SET_PROPERTY, ro_payload),
            frame(PKT_SERVER_EOT, Vec::new()),
        ];
        let (xport, state) = mock(reads);
        let mut proto = Protocol::new(xport, 0);
        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));

        assert_eq!(
            props.lock().unwrap().get_u32(crate::props::PROP_COMM_PORT, 0),
            31000
        );

        // the read-only violation was reported to the server in-session
        let st = state.lock().unwrap();
        let error_frames: Vec<&Vec<u8>> =
            st.written.iter().filter(|f| f[1] == PKT_CLIENT_ERROR).collect();
        assert_eq!(error_frames.len(), 1);
        let err_code = codec::read_uint(&error_frames[0][3..], 2);
        assert_eq!(err_code as u16, crate::status::ERROR_PROPERTY_READ_ONLY);
    }

    /// A server property-get produces a property-value reply.
    #[test]
    fn server_property_get() {
        let props = test_props();
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(8);
        queue_events(&events, 1);

        let mut get_payload = Vec::new();
        codec::write_uint(&mut get_payload, u32::from(PROP_COMM_HOST), 2);

        let reads = vec![
            frame(PKT_SERVER_GET_PROPERTY, get_payload),
            frame(PKT_SERVER_EOT, Vec::new()),
        ];
        let (xport, state) = mock(reads);
        let mut proto = Protocol::new(xport, 0);
        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));

        let st = state.lock().unwrap();
        let reply = st
            .written
            .iter()
            .find(|f| f[1] == PKT_CLIENT_PROPERTY_VALUE)
            .expect("property reply");
        let pkt = Packet::decode(reply).unwrap();
        assert_eq!(&pkt.payload[..2], &[0xF3, 0xA1]);
        assert_eq!(&pkt.payload[2..], b"localhost");
    }

    /// Repeated server errors trip the severe-error threshold and close
    /// the session.
    #[test]
    fn severe_errors_disconnect() {
        let props = test_props();
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(8);
        queue_events(&events, 1);

        let reads = vec![
            frame(PKT_SERVER_ERROR, vec![0xF1, 0x11]),
            frame(PKT_SERVER_ERROR, vec![0xF1, 0x11]),
            frame(PKT_SERVER_ERROR, vec![0xF1, 0x11]),
            // never reached: the threshold closes the session first
            frame(PKT_SERVER_EOT, Vec::new()),
        ];
        let (xport, state) = mock(reads);
        let mut proto = Protocol::new(xport, 0);
        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));

        assert_eq!(state.lock().unwrap().reads.len(), 1); // EOT never read
        assert_eq!(proto.total_severe_errors(), 3);
    }

    /// A unique ID replaces the account/device identification block.
    #[test]
    fn unique_id_identification() {
        let props = test_props();
        props
            .lock()
            .unwrap()
            .set_binary(PROP_STATE_UNIQUE_ID, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(8);
        queue_events(&events, 1);

        let reads = vec![frame(PKT_SERVER_EOT, Vec::new())];
        let (xport, state) = mock(reads);
        let mut proto = Protocol::new(xport, 0);
        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));
        assert_eq!(proto.ident_mode(), SendIdent::Unique);

        let st = state.lock().unwrap();
        assert_eq!(st.written[0][1], PKT_CLIENT_UNIQUE_ID);
        assert_eq!(&st.written[0][3..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    /// First-brief sessions carry identification and an EOB only.
    #[test]
    fn speak_brief_session() {
        let props = test_props();
        props.lock().unwrap().set_bool(PROP_COMM_FIRST_BRIEF, true);
        let acct = Mutex::new(Accounting::new());
        let events = PacketQueue::new(8);
        queue_events(&events, 2);

        let reads = vec![frame(PKT_SERVER_EOT, Vec::new())];
        let (xport, state) = mock(reads);
        let mut proto = Protocol::new(xport, 0);
        assert!(proto.transport_cycle(&props, &acct, &events, Encoding::Binary, 1_700_000_000));

        let st = state.lock().unwrap();
        let types: Vec<u8> = st.written.iter().map(|f| f[1]).collect();
        assert_eq!(
            types,
            vec![PKT_CLIENT_ACCOUNT_ID, PKT_CLIENT_DEVICE_ID, PKT_CLIENT_EOB_DONE]
        );
        // events remain for the next, full session
        assert_eq!(events.len(), 2);
    }
}
