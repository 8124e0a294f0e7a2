//! Minimal DNS TXT lookups for the checkpoint loader.
//!
//! Only what the checkpoint path needs: one UDP query per host, TXT answers
//! parsed with compression-pointer skipping. Anything unexpected is an
//! `io::Error`; the caller treats a failed host as a missing vote.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TYPE_TXT: u16 = 16;
const CLASS_IN: u16 = 1;
const MAX_RESPONSE: usize = 4096;

pub trait TxtFetcher: Send + Sync {
    fn fetch_txt(&self, host: &str) -> io::Result<Vec<String>>;
}

pub struct SystemTxtFetcher {
    resolver: SocketAddr,
    timeout: Duration,
}

impl SystemTxtFetcher {
    pub fn new(resolver: SocketAddr) -> Self {
        Self {
            resolver,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(resolver: SocketAddr, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }
}

impl TxtFetcher for SystemTxtFetcher {
    fn fetch_txt(&self, host: &str) -> io::Result<Vec<String>> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.connect(self.resolver)?;

        let id = query_id();
        let query = build_query(id, host)?;
        socket.send(&query)?;

        let mut buf = [0u8; MAX_RESPONSE];
        let len = socket.recv(&mut buf)?;
        parse_txt_response(&buf[..len], id)
    }
}

fn query_id() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos & 0xffff) as u16 | 1
}

fn build_query(id: u16, host: &str) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(17 + host.len());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&0x0100u16.to_be_bytes()); // recursion desired
    out.extend_from_slice(&1u16.to_be_bytes()); // one question
    out.extend_from_slice(&[0u8; 6]); // an/ns/ar counts

    for label in host.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad hostname {host}"),
            ));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&TYPE_TXT.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    Ok(out)
}

fn parse_txt_response(data: &[u8], expected_id: u16) -> io::Result<Vec<String>> {
    let malformed = || io::Error::new(io::ErrorKind::InvalidData, "malformed DNS response");

    if data.len() < 12 {
        return Err(malformed());
    }
    let id = u16::from_be_bytes([data[0], data[1]]);
    if id != expected_id {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "DNS id mismatch"));
    }
    let rcode = data[3] & 0x0f;
    if rcode != 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("DNS error code {rcode}"),
        ));
    }
    let question_count = u16::from_be_bytes([data[4], data[5]]) as usize;
    let answer_count = u16::from_be_bytes([data[6], data[7]]) as usize;

    let mut cursor = 12usize;
    for _ in 0..question_count {
        cursor = skip_name(data, cursor).ok_or_else(malformed)?;
        cursor = cursor.checked_add(4).filter(|c| *c <= data.len()).ok_or_else(malformed)?;
    }

    let mut records = Vec::new();
    for _ in 0..answer_count {
        cursor = skip_name(data, cursor).ok_or_else(malformed)?;
        if cursor + 10 > data.len() {
            return Err(malformed());
        }
        let rtype = u16::from_be_bytes([data[cursor], data[cursor + 1]]);
        let rdlength = u16::from_be_bytes([data[cursor + 8], data[cursor + 9]]) as usize;
        cursor += 10;
        if cursor + rdlength > data.len() {
            return Err(malformed());
        }
        if rtype == TYPE_TXT {
            // TXT rdata is a run of length-prefixed character strings; one
            // record is their concatenation.
            let mut text = String::new();
            let mut offset = cursor;
            let end = cursor + rdlength;
            while offset < end {
                let len = data[offset] as usize;
                offset += 1;
                if offset + len > end {
                    return Err(malformed());
                }
                text.push_str(&String::from_utf8_lossy(&data[offset..offset + len]));
                offset += len;
            }
            records.push(text);
        }
        cursor += rdlength;
    }
    Ok(records)
}

/// Advance past a possibly-compressed name, returning the next offset.
fn skip_name(data: &[u8], mut cursor: usize) -> Option<usize> {
    loop {
        let len = *data.get(cursor)? as usize;
        if len == 0 {
            return Some(cursor + 1);
        }
        if len & 0xc0 == 0xc0 {
            // Compression pointer terminates the name.
            return (cursor + 2 <= data.len()).then_some(cursor + 2);
        }
        cursor = cursor.checked_add(1 + len)?;
        if cursor > data.len() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_response(id: u16, txts: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&0x8180u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(txts.len() as u16).to_be_bytes());
        out.extend_from_slice(&[0u8; 4]);
        // question: "a.b" TXT IN
        out.extend_from_slice(&[1, b'a', 1, b'b', 0]);
        out.extend_from_slice(&TYPE_TXT.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        for txt in txts {
            out.extend_from_slice(&[0xc0, 0x0c]); // pointer to the question name
            out.extend_from_slice(&TYPE_TXT.to_be_bytes());
            out.extend_from_slice(&CLASS_IN.to_be_bytes());
            out.extend_from_slice(&300u32.to_be_bytes());
            out.extend_from_slice(&((txt.len() + 1) as u16).to_be_bytes());
            out.push(txt.len() as u8);
            out.extend_from_slice(txt.as_bytes());
        }
        out
    }

    #[test]
    fn parses_txt_answers() {
        let response = fake_response(77, &["1000:aa", "2000:bb"]);
        let records = parse_txt_response(&response, 77).unwrap();
        assert_eq!(records, vec!["1000:aa".to_string(), "2000:bb".to_string()]);
    }

    #[test]
    fn rejects_id_mismatch() {
        let response = fake_response(77, &["x"]);
        assert!(parse_txt_response(&response, 78).is_err());
    }

    #[test]
    fn rejects_truncated_response() {
        let response = fake_response(77, &["1000:aa"]);
        assert!(parse_txt_response(&response[..response.len() - 3], 77).is_err());
    }

    #[test]
    fn query_layout() {
        let query = build_query(42, "checkpoints.example.org").unwrap();
        assert_eq!(&query[..2], &42u16.to_be_bytes());
        // qname starts after the 12 byte header with the first label length.
        assert_eq!(query[12], 11);
        assert_eq!(&query[13..24], b"checkpoints");
        assert!(build_query(42, "bad..name").is_err());
    }
}
