//! Protocol matchers evaluated against the bytes sniffed from a connection.

/// Client connection preface every HTTP/2 connection starts with.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;
const FRAME_TYPE_HEADERS: u8 = 0x1;
const FRAME_TYPE_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;
const PRIORITY_FIELDS_LEN: usize = 5;

// Longest HPACK integer the decoder accepts, prefix octet excluded.
const MAX_INTEGER_CONTINUATIONS: usize = 4;

/// Answer of a [`Matcher`] for the bytes seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Match,
    NoMatch,
    /// The prefix is consistent with the protocol but too short to decide.
    NeedMore,
}

/// A rule deciding whether a connection speaks a given protocol.
///
/// `probe` is called with the whole prefix read so far, every time more bytes
/// arrive, so implementations should be pure functions of their input.
pub trait Matcher: Send + Sync + 'static {
    /// Label of the protocol class, used in logs and metrics.
    fn protocol(&self) -> &'static str;

    fn probe(&self, prefix: &[u8]) -> Probe;
}

/// Matches connections whose first line is a valid HTTP/1.0 or HTTP/1.1
/// request line terminated by CRLF.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http1Matcher;

impl Matcher for Http1Matcher {
    fn protocol(&self) -> &'static str {
        "http1"
    }

    fn probe(&self, prefix: &[u8]) -> Probe {
        let line_end = prefix.iter().position(|&byte| byte == b'\n');
        let line = match line_end {
            Some(end) => match prefix.get(..=end) {
                Some(line) if line.ends_with(b"\r\n") => line,
                _ => return Probe::NoMatch,
            },
            None => prefix,
        };

        // Only the request line is handed to httparse, so no header slots.
        let mut headers = [httparse::EMPTY_HEADER; 0];
        let mut request = httparse::Request::new(&mut headers);
        let parsed = request.parse(line);

        match (parsed, line_end) {
            (Err(_), _) => Probe::NoMatch,
            (Ok(_), None) => Probe::NeedMore,
            (Ok(_), Some(_)) if request.version.is_some() => Probe::Match,
            (Ok(_), Some(_)) => Probe::NoMatch,
        }
    }
}

/// Matches HTTP/2 connections whose first header block carries a header with
/// the given name and a value starting with the given prefix.
///
/// Sniffing never writes to the connection, so no server SETTINGS frame is
/// sent before the client's first HEADERS frame arrives. Clients that hold
/// their request until they see the server preface (grpc-java, for one)
/// never produce a header block and are dropped once the sniff timeout
/// expires.
///
/// Header blocks carrying a dynamic table size update are not matched.
#[derive(Debug, Clone)]
pub struct Http2HeaderMatcher {
    protocol: &'static str,
    name: Vec<u8>,
    value_prefix: Vec<u8>,
}

impl Http2HeaderMatcher {
    pub fn new(protocol: &'static str, name: &str, value_prefix: &str) -> Self {
        Self {
            protocol,
            name: name.to_ascii_lowercase().into_bytes(),
            value_prefix: value_prefix.as_bytes().to_vec(),
        }
    }

    /// gRPC requests: `content-type: application/grpc`, including the
    /// `+proto` and `+json` variants.
    pub fn grpc() -> Self {
        Self::new("grpc", "content-type", "application/grpc")
    }

    fn match_header_block(&self, block: &[u8]) -> Probe {
        if !well_formed_header_block(block) {
            tracing::trace!("rejecting malformed sniffed HTTP/2 header block");
            return Probe::NoMatch;
        }

        match hpack::Decoder::new().decode(block) {
            Ok(fields) => {
                let found = fields.iter().any(|(name, value)| {
                    name.eq_ignore_ascii_case(&self.name) && value.starts_with(&self.value_prefix)
                });
                if found {
                    Probe::Match
                } else {
                    Probe::NoMatch
                }
            }
            Err(error) => {
                tracing::trace!(?error, "unable to decode sniffed HTTP/2 header block");
                Probe::NoMatch
            }
        }
    }
}

impl Matcher for Http2HeaderMatcher {
    fn protocol(&self) -> &'static str {
        self.protocol
    }

    fn probe(&self, prefix: &[u8]) -> Probe {
        let seen = prefix.len().min(HTTP2_PREFACE.len());
        if prefix.get(..seen) != HTTP2_PREFACE.get(..seen) {
            return Probe::NoMatch;
        }
        let Some(mut remaining) = prefix.get(HTTP2_PREFACE.len()..) else {
            return Probe::NeedMore;
        };

        // SETTINGS, WINDOW_UPDATE and friends may precede the first HEADERS
        // frame; once a header block is open only CONTINUATION may follow.
        let mut block: Option<Vec<u8>> = None;
        loop {
            let Some((frame, rest)) = Frame::split(remaining) else {
                return Probe::NeedMore;
            };
            remaining = rest;

            match (frame.kind, block.as_mut()) {
                (FRAME_TYPE_HEADERS, None) => {
                    let Some(fragment) = frame.header_fragment() else {
                        return Probe::NoMatch;
                    };
                    if frame.has_flag(FLAG_END_HEADERS) {
                        return self.match_header_block(fragment);
                    }
                    block = Some(fragment.to_vec());
                }
                (FRAME_TYPE_CONTINUATION, Some(open)) => {
                    open.extend_from_slice(frame.payload);
                    if frame.has_flag(FLAG_END_HEADERS) {
                        return self.match_header_block(open);
                    }
                }
                (_, Some(_)) => return Probe::NoMatch,
                _ => {}
            }
        }
    }
}

/// Walks the field representations of an HPACK block without decoding them.
///
/// `hpack::Decoder` panics on a truncated dynamic table size update, so size
/// updates are refused outright along with truncated or oversized integers.
fn well_formed_header_block(mut block: &[u8]) -> bool {
    while let Some(&first) = block.first() {
        let rest = match first {
            // indexed field
            0x80..=0xff => decode_integer(block, 7).map(|(_, rest)| rest),
            // literal with incremental indexing
            0x40..=0x7f => skip_literal_field(block, 6),
            // dynamic table size update
            0x20..=0x3f => None,
            // literal without indexing or never indexed
            _ => skip_literal_field(block, 4),
        };
        match rest {
            Some(rest) => block = rest,
            None => return false,
        }
    }
    true
}

fn skip_literal_field(input: &[u8], prefix_bits: u8) -> Option<&[u8]> {
    let (name_index, rest) = decode_integer(input, prefix_bits)?;
    let rest = if name_index == 0 {
        skip_string(rest)?
    } else {
        rest
    };
    skip_string(rest)
}

fn skip_string(input: &[u8]) -> Option<&[u8]> {
    let (length, rest) = decode_integer(input, 7)?;
    rest.get(length..)
}

/// Decodes an HPACK prefix integer, returning it with the remaining input.
fn decode_integer(input: &[u8], prefix_bits: u8) -> Option<(usize, &[u8])> {
    let (&first, mut rest) = input.split_first()?;
    let mask = u8::MAX >> (8 - prefix_bits);
    let mut value = usize::from(first & mask);
    if value < usize::from(mask) {
        return Some((value, rest));
    }

    for continuation in 0..MAX_INTEGER_CONTINUATIONS {
        let (&octet, tail) = rest.split_first()?;
        rest = tail;
        value = value.checked_add(usize::from(octet & 0x7f) << (7 * continuation))?;
        if octet & 0x80 == 0 {
            return Some((value, rest));
        }
    }
    None
}

struct Frame<'a> {
    kind: u8,
    flags: u8,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Splits one complete frame off the front of `input`.
    fn split(input: &'a [u8]) -> Option<(Self, &'a [u8])> {
        let header = input.get(..FRAME_HEADER_LEN)?;
        let &[l0, l1, l2, kind, flags, ..] = header else {
            return None;
        };
        let length = usize::from(l0) << 16 | usize::from(l1) << 8 | usize::from(l2);
        let body = input.get(FRAME_HEADER_LEN..)?;
        let payload = body.get(..length)?;
        let rest = body.get(length..)?;

        Some((
            Self {
                kind,
                flags,
                payload,
            },
            rest,
        ))
    }

    fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Header block fragment of a HEADERS frame, without padding and
    /// priority fields.
    fn header_fragment(&self) -> Option<&'a [u8]> {
        let mut fragment = self.payload;
        let mut padding = 0;
        if self.has_flag(FLAG_PADDED) {
            let (&pad_length, rest) = fragment.split_first()?;
            padding = usize::from(pad_length);
            fragment = rest;
        }
        if self.has_flag(FLAG_PRIORITY) {
            fragment = fragment.get(PRIORITY_FIELDS_LEN..)?;
        }
        fragment.get(..fragment.len().checked_sub(padding)?)
    }
}

/// Outcome of evaluating the routing table against a sniffed prefix.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Index of the first matching rule.
    Route(usize),
    Pending,
    Reject,
}

/// Evaluates matchers in priority order. A matcher that needs more bytes
/// blocks every lower-priority matcher until the input is `exhausted`, after
/// which it counts as no match.
pub(crate) fn classify<'m>(
    matchers: impl IntoIterator<Item = &'m dyn Matcher>,
    prefix: &[u8],
    exhausted: bool,
) -> Verdict {
    for (index, matcher) in matchers.into_iter().enumerate() {
        match matcher.probe(prefix) {
            Probe::Match => return Verdict::Route(index),
            Probe::NeedMore if !exhausted => return Verdict::Pending,
            Probe::NeedMore | Probe::NoMatch => {}
        }
    }
    Verdict::Reject
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let length = u32::try_from(payload.len()).unwrap().to_be_bytes();
        let mut out = vec![length[1], length[2], length[3], kind, flags];
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn header_block(content_type: &str) -> Vec<u8> {
        hpack::Encoder::new().encode(vec![
            (&b":method"[..], &b"POST"[..]),
            (&b":scheme"[..], &b"http"[..]),
            (&b":path"[..], &b"/product.Product/List"[..]),
            (&b":authority"[..], &b"localhost"[..]),
            (&b"content-type"[..], content_type.as_bytes()),
            (&b"te"[..], &b"trailers"[..]),
        ])
    }

    fn h2_connection(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = HTTP2_PREFACE.to_vec();
        for f in frames {
            out.extend_from_slice(f);
        }
        out
    }

    #[test]
    fn http1_request_line_matches() {
        let request = b"GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(Http1Matcher.probe(request), Probe::Match);
        assert_eq!(Http1Matcher.probe(b"POST /product HTTP/1.0\r\n"), Probe::Match);
    }

    #[test]
    fn http1_partial_request_line_needs_more() {
        assert_eq!(Http1Matcher.probe(b""), Probe::NeedMore);
        assert_eq!(Http1Matcher.probe(b"GE"), Probe::NeedMore);
        assert_eq!(Http1Matcher.probe(b"GET /ping HTTP/1"), Probe::NeedMore);
        assert_eq!(Http1Matcher.probe(b"GET /ping HTTP/1.1"), Probe::NeedMore);
        assert_eq!(Http1Matcher.probe(b"GET /ping HTTP/1.1\r"), Probe::NeedMore);
    }

    #[test]
    fn http1_request_line_must_end_with_crlf() {
        assert_eq!(Http1Matcher.probe(b"GET / HTTP/1.1garbage\r\n"), Probe::NoMatch);
        assert_eq!(Http1Matcher.probe(b"GET / HTTP/1.1garbage"), Probe::NoMatch);
        assert_eq!(Http1Matcher.probe(b"GET / HTTP/1.1\nHost: x\n\n"), Probe::NoMatch);
        assert_eq!(Http1Matcher.probe(b"GET / HTTP/1.1\r\n"), Probe::Match);
    }

    #[test]
    fn http1_rejects_other_protocols() {
        assert_eq!(Http1Matcher.probe(HTTP2_PREFACE), Probe::NoMatch);
        assert_eq!(Http1Matcher.probe(b"HELLO\r\n"), Probe::NoMatch);
        assert_eq!(Http1Matcher.probe(&[0x16, 0x03, 0x01, 0x00]), Probe::NoMatch);
    }

    #[test]
    fn grpc_headers_frame_matches() {
        let input = h2_connection(&[
            frame(0x4, 0, 0, &[]),
            frame(0x8, 0, 0, &[0, 0, 0xff, 0xff]),
            frame(FRAME_TYPE_HEADERS, FLAG_END_HEADERS, 1, &header_block("application/grpc")),
        ]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::Match);
    }

    #[test]
    fn grpc_content_type_variants_match() {
        let input = h2_connection(&[frame(
            FRAME_TYPE_HEADERS,
            FLAG_END_HEADERS,
            1,
            &header_block("application/grpc+proto"),
        )]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::Match);
    }

    #[test]
    fn http2_without_grpc_content_type_does_not_match() {
        let input = h2_connection(&[frame(
            FRAME_TYPE_HEADERS,
            FLAG_END_HEADERS,
            1,
            &header_block("application/json"),
        )]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::NoMatch);
    }

    #[test]
    fn header_block_split_across_continuation_frames() {
        let block = header_block("application/grpc");
        let (first, second) = block.split_at(block.len() / 2);
        let input = h2_connection(&[
            frame(0x4, 0, 0, &[]),
            frame(FRAME_TYPE_HEADERS, 0, 1, first),
            frame(FRAME_TYPE_CONTINUATION, FLAG_END_HEADERS, 1, second),
        ]);
        let matcher = Http2HeaderMatcher::grpc();
        assert_eq!(matcher.probe(&input), Probe::Match);

        // every strict prefix is undecided
        for cut in 0..input.len() {
            assert_eq!(matcher.probe(&input[..cut]), Probe::NeedMore, "cut at {cut}");
        }
    }

    #[test]
    fn padded_and_prioritized_headers_frame_matches() {
        let block = header_block("application/grpc");
        let mut payload = vec![3];
        payload.extend_from_slice(&[0x80, 0, 0, 0, 16]);
        payload.extend_from_slice(&block);
        payload.extend_from_slice(&[0, 0, 0]);
        let input = h2_connection(&[frame(
            FRAME_TYPE_HEADERS,
            FLAG_END_HEADERS | FLAG_PADDED | FLAG_PRIORITY,
            1,
            &payload,
        )]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::Match);
    }

    #[test]
    fn frame_interleaved_in_open_header_block_is_rejected() {
        let block = header_block("application/grpc");
        let input = h2_connection(&[
            frame(FRAME_TYPE_HEADERS, 0, 1, &block),
            frame(0x8, 0, 0, &[0, 0, 0xff, 0xff]),
        ]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::NoMatch);
    }

    #[test]
    fn malformed_table_size_update_is_rejected() {
        let matcher = Http2HeaderMatcher::grpc();
        let truncated = [0x3f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let input = h2_connection(&[frame(FRAME_TYPE_HEADERS, FLAG_END_HEADERS, 1, &truncated)]);
        assert_eq!(matcher.probe(&input), Probe::NoMatch);

        // a size update after a valid field is refused as well
        let mut block = header_block("application/grpc");
        block.extend_from_slice(&[0x3f, 0xff]);
        let input = h2_connection(&[frame(FRAME_TYPE_HEADERS, FLAG_END_HEADERS, 1, &block)]);
        assert_eq!(matcher.probe(&input), Probe::NoMatch);
    }

    #[test]
    fn truncated_header_block_is_rejected() {
        let block = header_block("application/grpc");
        let input = h2_connection(&[frame(
            FRAME_TYPE_HEADERS,
            FLAG_END_HEADERS,
            1,
            &block[..block.len() - 1],
        )]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::NoMatch);

        // literal name string claiming more octets than the block holds
        let input = h2_connection(&[frame(FRAME_TYPE_HEADERS, FLAG_END_HEADERS, 1, &[0x00, 0x7f])]);
        assert_eq!(Http2HeaderMatcher::grpc().probe(&input), Probe::NoMatch);
    }

    #[test]
    fn hpack_integers_follow_prefix_encoding() {
        assert_eq!(decode_integer(&[0x0a], 5), Some((10, &[][..])));
        // 1337 with a 5-bit prefix, as in RFC 7541 C.1.2
        assert_eq!(decode_integer(&[0x1f, 0x9a, 0x0a, 0xff], 5), Some((1337, &[0xff][..])));
        assert_eq!(decode_integer(&[0x1f, 0x9a], 5), None);
        assert_eq!(decode_integer(&[0x1f, 0xff, 0xff, 0xff, 0xff, 0x01], 5), None);
    }

    #[test]
    fn wrong_preface_is_rejected_early() {
        assert_eq!(Http2HeaderMatcher::grpc().probe(b"PRI"), Probe::NeedMore);
        assert_eq!(Http2HeaderMatcher::grpc().probe(b"PUT"), Probe::NoMatch);
    }

    #[test]
    fn classify_respects_rule_priority() {
        let grpc = Http2HeaderMatcher::grpc();
        let rules: [&dyn Matcher; 2] = [&grpc, &Http1Matcher];

        // "P" could still become the HTTP/2 preface, so HTTP/1 must wait
        assert_eq!(classify(rules, b"P", false), Verdict::Pending);
        assert_eq!(classify(rules, b"PUT /x HTTP/1.1\r\n", false), Verdict::Route(1));

        let grpc_input = h2_connection(&[frame(
            FRAME_TYPE_HEADERS,
            FLAG_END_HEADERS,
            1,
            &header_block("application/grpc"),
        )]);
        assert_eq!(classify(rules, &grpc_input, false), Verdict::Route(0));
        assert_eq!(classify(rules, b"\x00\x01garbage", false), Verdict::Reject);
    }

    #[test]
    fn classify_rejects_undecided_input_once_exhausted() {
        let grpc = Http2HeaderMatcher::grpc();
        let rules: [&dyn Matcher; 2] = [&grpc, &Http1Matcher];
        assert_eq!(classify(rules, HTTP2_PREFACE, true), Verdict::Reject);
        assert_eq!(classify(rules, b"GET /pi", true), Verdict::Reject);
    }
}
