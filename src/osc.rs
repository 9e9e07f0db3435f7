use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crossbeam_channel::Sender;
use log::{debug, info, warn};
use rosc::{OscMessage, OscPacket, OscType};
use scan_fmt::scan_fmt;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::console::{ConsoleError, Route, sequence_command};

#[derive(Error, Debug)]
pub enum OscError {
    #[error("Invalid IP:Port formatting: {0}")]
    InvalidIpFormatting(String),
    #[error("Binding Error: {0}")]
    BindingError(String),
    #[error("Unknown OSC address: {0}")]
    UnknownAddress(String),
    #[error("{0}")]
    Command(#[from] ConsoleError),
}

/// Verbs whose float argument is a 0..1 fader mapped onto 0..255.
const LEVEL_VERBS: [&str; 3] = ["master", "size", "scanner_size"];

/// Verbs that act on button press only; a zero argument is the release.
const TRIGGER_VERBS: [&str; 4] = ["start", "stop", "clear", "static"];

pub fn parse_address(address: &str) -> Result<SocketAddr, OscError> {
    match scan_fmt!(address, "{}.{}.{}.{}:{}", u8, u8, u8, u8, u16) {
        Ok((a, b, c, d, port)) => Ok(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(a, b, c, d)),
            port,
        )),
        Err(_) => Err(OscError::InvalidIpFormatting(address.to_string())),
    }
}

/// Listens for OSC on UDP and forwards every recognised message as a [`Route`].
pub struct OscListener {
    handle: JoinHandle<()>,
}

impl Drop for OscListener {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("OSC listener stopped");
    }
}

impl OscListener {
    pub async fn bind(address: &str, routes: Sender<Route>) -> Result<Self, OscError> {
        let addr = parse_address(address)?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| OscError::BindingError(e.to_string()))?;
        info!("Listening for OSC at {addr}");
        let handle = tokio::spawn(async move {
            let mut buffer = [0u8; rosc::decoder::MTU];
            loop {
                let size = match socket.recv_from(&mut buffer).await {
                    Ok((size, _)) => size,
                    Err(e) => {
                        warn!("OSC receive failed: {e}");
                        continue;
                    }
                };
                let packet = match rosc::decoder::decode_udp(&buffer[..size]) {
                    Ok((_, packet)) => packet,
                    Err(e) => {
                        warn!("Invalid OSC packet: {e:?}");
                        continue;
                    }
                };
                for route in routes_of(&packet) {
                    match route {
                        Ok(route) => {
                            if routes.send(route).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!("{e}"),
                    }
                }
            }
        });
        Ok(Self { handle })
    }
}

/// Every route carried by a packet; bundles are flattened.
pub fn routes_of(packet: &OscPacket) -> Vec<Result<Route, OscError>> {
    match packet {
        OscPacket::Message(msg) => route(msg).into_iter().collect(),
        OscPacket::Bundle(bundle) => bundle.content.iter().flat_map(routes_of).collect(),
    }
}

/// Maps `/beat` and `/sequence/<n>/<verb>` messages. `None` for button
/// releases that carry no command.
pub fn route(msg: &OscMessage) -> Option<Result<Route, OscError>> {
    if msg.addr == "/beat" {
        return Some(Ok(Route::Beat));
    }
    let Ok((seq, verb)) = scan_fmt!(&msg.addr, "/sequence/{}/{}", usize, String) else {
        return Some(Err(OscError::UnknownAddress(msg.addr.clone())));
    };
    let Some(index) = seq.checked_sub(1) else {
        return Some(Err(ConsoleError::InvalidSequence(seq).into()));
    };
    if TRIGGER_VERBS.contains(&verb.as_str()) && msg.args.first().is_some_and(is_zero) {
        return None;
    }
    let args = arguments(&verb, &msg.args);
    Some(
        sequence_command(&verb, &args)
            .map(|cmd| Route::Sequence(index, cmd))
            .map_err(OscError::from),
    )
}

fn is_zero(arg: &OscType) -> bool {
    match arg {
        OscType::Int(x) => *x == 0,
        OscType::Long(x) => *x == 0,
        OscType::Float(x) => *x == 0.0,
        OscType::Double(x) => *x == 0.0,
        OscType::Bool(b) => !b,
        _ => false,
    }
}

fn number(verb: &str, arg: &OscType) -> Option<i64> {
    let level = LEVEL_VERBS.contains(&verb);
    match arg {
        OscType::Int(x) => Some(*x as i64),
        OscType::Long(x) => Some(*x),
        OscType::Float(x) if level && (0.0..=1.0).contains(x) => Some((*x * 255.0).round() as i64),
        OscType::Double(x) if level && (0.0..=1.0).contains(x) => Some((*x * 255.0).round() as i64),
        OscType::Float(x) => Some(x.round() as i64),
        OscType::Double(x) => Some(x.round() as i64),
        OscType::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// Turns OSC arguments into the console's argument words.
fn arguments(verb: &str, args: &[OscType]) -> Vec<String> {
    let word = |arg: &OscType| match arg {
        OscType::String(s) => s.to_lowercase(),
        other => number(verb, other)
            .map(|n| n.to_string())
            .unwrap_or_default(),
    };
    if verb != "fixture" {
        return args.iter().map(word).collect();
    }
    // `/sequence/<n>/fixture <i> <enabled> <invert> <reverse>`
    let mut words: Vec<String> = args.iter().take(1).map(word).collect();
    let flags: Vec<bool> = args.iter().skip(1).map(|a| !is_zero(a)).collect();
    if let Some(enabled) = flags.first() {
        words.push(if *enabled { "on" } else { "off" }.to_string());
    }
    if flags.get(1).copied().unwrap_or(false) {
        words.push("invert".to_string());
    }
    if flags.get(2).copied().unwrap_or(false) {
        words.push("reverse".to_string());
    }
    words
}
