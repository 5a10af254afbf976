//! Heart-beat negotiation on top of `iridium_stomp`'s header helpers.

use std::time::Duration;

use iridium_stomp::{Heartbeat, negotiate_heartbeats, parse_heartbeat_header};

/// Intervals in effect for one session. `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

/// Combine our CONNECT proposal with the `heart-beat` header of CONNECTED.
///
/// Each direction runs at the larger of the two proposals, and is off when
/// either side proposes zero. A missing header means the peer does none.
pub fn negotiate(ours: &Heartbeat, peer_header: Option<&str>) -> Negotiated {
    let (peer_out, peer_in) = peer_header.map(parse_heartbeat_header).unwrap_or((0, 0));
    let our_out = u64::from(ours.send_ms);
    let our_in = u64::from(ours.receive_ms);

    let (outgoing, incoming) = negotiate_heartbeats(our_out, our_in, peer_out, peer_in);
    Negotiated {
        outgoing: outgoing.filter(|_| our_out != 0 && peer_in != 0),
        incoming: incoming.filter(|_| our_in != 0 && peer_out != 0),
    }
}
