//! Static-table QPACK (RFC 9204).
//!
//! The adapter advertises a zero-capacity dynamic table, so a conforming
//! peer only ever sends static references and literals. Huffman-coded
//! strings are decoded; everything we emit is plain literal text.

use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Encode a header block. Exact static-table matches become indexed field
/// lines, known names become static name references, the rest is literal.
pub fn encode_header_block(headers: &[(String, String)]) -> Vec<u8> {
    // Required Insert Count = 0, Delta Base = 0.
    let mut buf = vec![0x00, 0x00];

    for (name, value) in headers {
        match static_lookup(name, value) {
            StaticMatch::Full(index) => write_prefix_int(&mut buf, index as u64, 6, 0xc0),
            StaticMatch::Name(index) => {
                write_prefix_int(&mut buf, index as u64, 4, 0x50);
                write_string(&mut buf, value.as_bytes(), 7, 0x00);
            }
            StaticMatch::None => {
                write_string(&mut buf, name.as_bytes(), 3, 0x20);
                write_string(&mut buf, value.as_bytes(), 7, 0x00);
            }
        }
    }

    buf
}

pub fn decode_header_block(data: &[u8]) -> Result<Vec<(String, String)>> {
    let (required_insert_count, mut offset) = read_prefix_int(data, 8)?;
    if required_insert_count != 0 {
        return Err(Error::Qpack("header block references the dynamic table".into()));
    }
    let (_, n) = read_prefix_int(&data[offset..], 7)?;
    offset += n;

    let mut headers = Vec::new();
    while offset < data.len() {
        let line = &data[offset..];
        let first = line[0];

        let (field, used) = if first & 0x80 != 0 {
            // 1 T index(6)
            if first & 0x40 == 0 {
                return Err(Error::Qpack("dynamic table not supported".into()));
            }
            let (index, n) = read_prefix_int(line, 6)?;
            let (name, value) = static_entry(index)?;
            ((name.to_owned(), value.to_owned()), n)
        } else if first & 0xc0 == 0x40 {
            // 01 N T index(4)
            if first & 0x10 == 0 {
                return Err(Error::Qpack("dynamic table not supported".into()));
            }
            let (index, n) = read_prefix_int(line, 4)?;
            let (name, _) = static_entry(index)?;
            let (value, m) = read_string(&line[n..], 7)?;
            ((name.to_owned(), value), n + m)
        } else if first & 0xe0 == 0x20 {
            // 001 N H len(3)
            let (name, n) = read_string(line, 3)?;
            let (value, m) = read_string(&line[n..], 7)?;
            ((name, value), n + m)
        } else {
            return Err(Error::Qpack(format!(
                "unsupported field line encoding {first:#04x}"
            )));
        };

        headers.push(field);
        offset += used;
    }

    Ok(headers)
}

enum StaticMatch {
    Full(usize),
    Name(usize),
    None,
}

fn static_lookup(name: &str, value: &str) -> StaticMatch {
    let mut by_name = None;
    for (i, &(n, v)) in STATIC_TABLE.iter().enumerate() {
        if n != name {
            continue;
        }
        if v == value {
            return StaticMatch::Full(i);
        }
        by_name.get_or_insert(i);
    }
    by_name.map_or(StaticMatch::None, StaticMatch::Name)
}

fn static_entry(index: u64) -> Result<(&'static str, &'static str)> {
    usize::try_from(index)
        .ok()
        .and_then(|i| STATIC_TABLE.get(i).copied())
        .ok_or_else(|| Error::Qpack(format!("static index {index} out of range")))
}

fn write_prefix_int(buf: &mut Vec<u8>, value: u64, prefix_bits: u8, flags: u8) {
    let max = (1u64 << prefix_bits) - 1;
    if value < max {
        buf.push(flags | value as u8);
        return;
    }
    buf.push(flags | max as u8);
    let mut rest = value - max;
    while rest >= 0x80 {
        buf.push(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    buf.push(rest as u8);
}

fn read_prefix_int(data: &[u8], prefix_bits: u8) -> Result<(u64, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::Qpack("truncated prefix integer".into()))?;
    let max = (1u64 << prefix_bits) - 1;
    let mut value = u64::from(first) & max;
    if value < max {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in data[1..].iter().enumerate() {
        if shift > 56 {
            return Err(Error::Qpack("prefix integer overflow".into()));
        }
        value += u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 2));
        }
        shift += 7;
    }
    Err(Error::Qpack("truncated prefix integer".into()))
}

fn write_string(buf: &mut Vec<u8>, s: &[u8], prefix_bits: u8, flags: u8) {
    write_prefix_int(buf, s.len() as u64, prefix_bits, flags);
    buf.extend_from_slice(s);
}

/// The Huffman flag sits immediately above the length prefix.
fn read_string(data: &[u8], prefix_bits: u8) -> Result<(String, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| Error::Qpack("truncated string literal".into()))?;
    let huffman = first & (1 << prefix_bits) != 0;
    let (len, n) = read_prefix_int(data, prefix_bits)?;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| n.checked_add(len))
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::Qpack("truncated string literal".into()))?;

    let raw = &data[n..end];
    let bytes = if huffman {
        huffman_decode(raw)?
    } else {
        raw.to_vec()
    };
    let s = String::from_utf8(bytes)
        .map_err(|_| Error::Qpack("string literal is not UTF-8".into()))?;
    Ok((s, end))
}

#[derive(Clone, Copy)]
struct Node {
    children: [Option<u16>; 2],
    symbol: Option<u8>,
}

const EMPTY: Node = Node {
    children: [None, None],
    symbol: None,
};

fn huffman_tree() -> &'static [Node] {
    static TREE: OnceLock<Vec<Node>> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut nodes = vec![EMPTY];
        for (symbol, &(code, bits)) in HUFFMAN_CODES[..256].iter().enumerate() {
            let mut at = 0usize;
            for shift in (0..bits).rev() {
                let bit = ((code >> shift) & 1) as usize;
                at = match nodes[at].children[bit] {
                    Some(next) => usize::from(next),
                    None => {
                        let next = nodes.len();
                        nodes.push(EMPTY);
                        nodes[at].children[bit] = Some(next as u16);
                        next
                    }
                };
            }
            nodes[at].symbol = Some(symbol as u8);
        }
        nodes
    })
}

fn huffman_decode(data: &[u8]) -> Result<Vec<u8>> {
    let tree = huffman_tree();
    let mut out = Vec::with_capacity(data.len() * 8 / 5);
    let mut at = 0usize;
    // Bits walked since the last emitted symbol, and whether all were ones.
    let mut pending = 0u32;
    let mut all_ones = true;

    for &byte in data {
        for shift in (0..8).rev() {
            let bit = ((byte >> shift) & 1) as usize;
            at = tree[at].children[bit]
                .map(usize::from)
                .ok_or_else(|| Error::Qpack("invalid Huffman code".into()))?;
            pending += 1;
            all_ones &= bit == 1;
            if let Some(symbol) = tree[at].symbol {
                out.push(symbol);
                at = 0;
                pending = 0;
                all_ones = true;
            }
        }
    }

    if pending > 7 || !all_ones {
        return Err(Error::Qpack("invalid Huffman padding".into()));
    }
    Ok(out)
}

// RFC 7541 Appendix B, indexed by symbol; entry 256 is EOS.
static HUFFMAN_CODES: [(u32, u8); 257] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
    (0x3fffffff, 30),
];

// RFC 9204 Appendix A.
static STATIC_TABLE: [(&str, &str); 99] = [
    /*  0 */ (":authority", ""),
    /*  1 */ (":path", "/"),
    /*  2 */ ("age", "0"),
    /*  3 */ ("content-disposition", ""),
    /*  4 */ ("content-length", "0"),
    /*  5 */ ("cookie", ""),
    /*  6 */ ("date", ""),
    /*  7 */ ("etag", ""),
    /*  8 */ ("if-modified-since", ""),
    /*  9 */ ("if-none-match", ""),
    /* 10 */ ("last-modified", ""),
    /* 11 */ ("link", ""),
    /* 12 */ ("location", ""),
    /* 13 */ ("referer", ""),
    /* 14 */ ("set-cookie", ""),
    /* 15 */ (":method", "CONNECT"),
    /* 16 */ (":method", "DELETE"),
    /* 17 */ (":method", "GET"),
    /* 18 */ (":method", "HEAD"),
    /* 19 */ (":method", "OPTIONS"),
    /* 20 */ (":method", "POST"),
    /* 21 */ (":method", "PUT"),
    /* 22 */ (":scheme", "http"),
    /* 23 */ (":scheme", "https"),
    /* 24 */ (":status", "103"),
    /* 25 */ (":status", "200"),
    /* 26 */ (":status", "304"),
    /* 27 */ (":status", "404"),
    /* 28 */ (":status", "503"),
    /* 29 */ ("accept", "*/*"),
    /* 30 */ ("accept", "application/dns-message"),
    /* 31 */ ("accept-encoding", "gzip, deflate, br"),
    /* 32 */ ("accept-ranges", "bytes"),
    /* 33 */ ("access-control-allow-headers", "cache-control"),
    /* 34 */ ("access-control-allow-headers", "content-type"),
    /* 35 */ ("access-control-allow-origin", "*"),
    /* 36 */ ("cache-control", "max-age=0"),
    /* 37 */ ("cache-control", "max-age=2592000"),
    /* 38 */ ("cache-control", "max-age=604800"),
    /* 39 */ ("cache-control", "no-cache"),
    /* 40 */ ("cache-control", "no-store"),
    /* 41 */ ("cache-control", "public, max-age=31536000"),
    /* 42 */ ("content-encoding", "br"),
    /* 43 */ ("content-encoding", "gzip"),
    /* 44 */ ("content-type", "application/dns-message"),
    /* 45 */ ("content-type", "application/javascript"),
    /* 46 */ ("content-type", "application/json"),
    /* 47 */ ("content-type", "application/x-www-form-urlencoded"),
    /* 48 */ ("content-type", "image/gif"),
    /* 49 */ ("content-type", "image/jpeg"),
    /* 50 */ ("content-type", "image/png"),
    /* 51 */ ("content-type", "text/css"),
    /* 52 */ ("content-type", "text/html; charset=utf-8"),
    /* 53 */ ("content-type", "text/plain"),
    /* 54 */ ("content-type", "text/plain;charset=utf-8"),
    /* 55 */ ("range", "bytes=0-"),
    /* 56 */ ("strict-transport-security", "max-age=31536000"),
    /* 57 */ ("strict-transport-security", "max-age=31536000; includesubdomains"),
    /* 58 */ ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    /* 59 */ ("vary", "accept-encoding"),
    /* 60 */ ("vary", "origin"),
    /* 61 */ ("x-content-type-options", "nosniff"),
    /* 62 */ ("x-xss-protection", "1; mode=block"),
    /* 63 */ (":status", "100"),
    /* 64 */ (":status", "204"),
    /* 65 */ (":status", "206"),
    /* 66 */ (":status", "302"),
    /* 67 */ (":status", "400"),
    /* 68 */ (":status", "403"),
    /* 69 */ (":status", "421"),
    /* 70 */ (":status", "425"),
    /* 71 */ (":status", "500"),
    /* 72 */ ("accept-language", ""),
    /* 73 */ ("access-control-allow-credentials", "FALSE"),
    /* 74 */ ("access-control-allow-credentials", "TRUE"),
    /* 75 */ ("access-control-allow-headers", "*"),
    /* 76 */ ("access-control-allow-methods", "get"),
    /* 77 */ ("access-control-allow-methods", "get, post, options"),
    /* 78 */ ("access-control-allow-methods", "options"),
    /* 79 */ ("access-control-expose-headers", "content-length"),
    /* 80 */ ("access-control-request-headers", "content-type"),
    /* 81 */ ("access-control-request-method", "get"),
    /* 82 */ ("access-control-request-method", "post"),
    /* 83 */ ("alt-svc", "clear"),
    /* 84 */ ("authorization", ""),
    /* 85 */ ("content-security-policy", "script-src 'none'; object-src 'none'; base-uri 'none'"),
    /* 86 */ ("early-data", "1"),
    /* 87 */ ("expect-ct", ""),
    /* 88 */ ("forwarded", ""),
    /* 89 */ ("if-range", ""),
    /* 90 */ ("origin", ""),
    /* 91 */ ("purpose", "prefetch"),
    /* 92 */ ("server", ""),
    /* 93 */ ("timing-allow-origin", "*"),
    /* 94 */ ("upgrade-insecure-requests", "1"),
    /* 95 */ ("user-agent", ""),
    /* 96 */ ("x-forwarded-for", ""),
    /* 97 */ ("x-frame-options", "deny"),
    /* 98 */ ("x-frame-options", "sameorigin"),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(headers: &[(&str, &str)]) -> Vec<(String, String)> {
        headers
            .iter()
            .map(|&(n, v)| (n.to_owned(), v.to_owned()))
            .collect()
    }

    #[test]
    fn connect_request_round_trip() {
        let headers = owned(&[
            (":method", "CONNECT"),
            (":protocol", "webtransport"),
            (":scheme", "https"),
            (":authority", "localhost:11000"),
            (":path", "/echo.py?x=1"),
            ("origin", "https://web-platform.test"),
        ]);
        let block = encode_header_block(&headers);
        assert_eq!(decode_header_block(&block).unwrap(), headers);
    }

    #[test]
    fn exact_static_match_is_one_byte() {
        // :status 200 is static index 25 -> 0b11_011001.
        let block = encode_header_block(&owned(&[(":status", "200")]));
        assert_eq!(block, vec![0x00, 0x00, 0xd9]);
    }

    #[test]
    fn static_name_reference_with_literal_value() {
        // Name index 15 saturates the 4-bit prefix: 0x5f 0x00, then "GET".
        let data = [0x00, 0x00, 0x5f, 0x00, 0x03, b'G', b'E', b'T'];
        let headers = decode_header_block(&data).unwrap();
        assert_eq!(headers, owned(&[(":method", "GET")]));
    }

    #[test]
    fn huffman_string_value() {
        // RFC 7541 C.4.1: "www.example.com".
        let mut data = vec![0x00, 0x00, 0x50, 0x8c];
        data.extend_from_slice(&[
            0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ]);
        let headers = decode_header_block(&data).unwrap();
        assert_eq!(headers, owned(&[(":authority", "www.example.com")]));
    }

    #[test]
    fn bad_huffman_padding_rejected() {
        // 'a' is 00011 (5 bits); zero padding is invalid.
        assert!(huffman_decode(&[0x18]).is_err());
        assert_eq!(huffman_decode(&[0x1f]).unwrap(), b"a");
    }

    #[test]
    fn dynamic_references_rejected() {
        assert!(decode_header_block(&[0x01, 0x00]).is_err());
        assert!(decode_header_block(&[0x00, 0x00, 0x80]).is_err());
        assert!(decode_header_block(&[0x00, 0x00, 0xff, 0x7f]).is_err());
    }

    #[test]
    fn prefix_int_boundaries() {
        for value in [0u64, 30, 31, 127, 128, 1337, 65535] {
            let mut buf = Vec::new();
            write_prefix_int(&mut buf, value, 5, 0xe0);
            assert_eq!(buf[0] & 0xe0, 0xe0);
            assert_eq!(read_prefix_int(&buf, 5).unwrap(), (value, buf.len()));
        }
        assert!(read_prefix_int(&[0x1f, 0x80], 5).is_err());
    }
}
