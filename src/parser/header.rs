//! Header decoding: raw header blocks into record fields.
//!
//! Covers folding, RFC 2047 encoded-words, 8-bit headers in a sniffed
//! charset, address lists, Message-ID threading chains, mailing-list
//! detection and the many date formats found in real mail.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::model::address::{self, Address};
use crate::model::flags::MessageFlags;
use crate::model::info::{Decoded, RecordFields, RecordState};
use crate::model::message_id::MessageIdHash;
use crate::model::pool;

/// Unfolded header block, names lowercased, values still encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHeaders {
    entries: Vec<(String, String)>,
    charset: Option<String>,
}

impl RawHeaders {
    /// Parse a raw header block.
    ///
    /// Valid UTF-8 is taken as is. Otherwise the bytes are decoded with the
    /// charset named in Content-Type, falling back to Windows-1252 (which
    /// accepts every byte) when that is absent, unknown or `us-ascii`.
    pub fn parse(bytes: &[u8]) -> Self {
        let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

        if let Ok(text) = std::str::from_utf8(bytes) {
            let entries = unfold_headers(text);
            let charset = content_type_charset(&entries);
            return Self { entries, charset };
        }

        let (latin, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
        let sniffed = unfold_headers(&latin);
        let charset = content_type_charset(&sniffed);
        let encoding = charset
            .as_deref()
            .filter(|c| !c.eq_ignore_ascii_case("us-ascii"))
            .and_then(|c| Encoding::for_label(c.as_bytes()));

        let entries = match encoding {
            Some(encoding) if encoding != encoding_rs::WINDOWS_1252 => {
                let (decoded, _, _) = encoding.decode(bytes);
                unfold_headers(&decoded)
            }
            _ => sniffed,
        };
        Self { entries, charset }
    }

    /// Build from `(name, value)` pairs, e.g. headers fetched over IMAP.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let entries: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_ascii_lowercase(), v.into()))
            .collect();
        let charset = content_type_charset(&entries);
        Self { entries, charset }
    }

    /// First value of a header (name is case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a header, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Charset parameter of Content-Type, if any.
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode the shared record fields from a header block.
pub fn decode_record(headers: &RawHeaders) -> Decoded {
    let text = |name: &str| headers.get(name).map(decode_encoded_words);
    let addresses = |name: &str| {
        text(name)
            .map(|v| address::format_list(&Address::parse_list(&v)))
            .filter(|v| !v.is_empty())
    };

    let subject = text("subject").map(|s| s.trim().to_string());
    let mut fields = RecordFields::with_strings(
        subject.as_deref(),
        addresses("from").as_deref(),
        addresses("to").as_deref(),
        addresses("cc").as_deref(),
    );

    fields.mailing_list = pool::intern_opt(mailing_list(headers).as_deref());
    fields.message_id = headers
        .get("message-id")
        .and_then(|v| MessageIdHash::from_id(&extract_angle_bracket(v)));
    fields.references = references(headers, fields.message_id);

    fields.date_sent = headers
        .get("date")
        .and_then(parse_date)
        .unwrap_or(DateTime::UNIX_EPOCH);
    fields.date_received = headers
        .get("received")
        .and_then(|v| v.rsplit_once(';'))
        .and_then(|(_, date)| parse_date(date))
        .unwrap_or(DateTime::UNIX_EPOCH);

    Decoded {
        fields,
        state: RecordState {
            flags: header_flags(headers),
            ..RecordState::default()
        },
        extra: None,
    }
}

/// Ancestors nearest-parent first: the first id of In-Reply-To, then
/// References from the end. Duplicates and self-references are dropped.
fn references(headers: &RawHeaders, own: Option<MessageIdHash>) -> Vec<MessageIdHash> {
    let mut chain: Vec<String> = Vec::new();
    if let Some(irt) = headers
        .get("in-reply-to")
        .and_then(|v| extract_all_angle_brackets(v).into_iter().next())
    {
        chain.push(irt);
    }
    if let Some(refs) = headers.get("references") {
        chain.extend(extract_all_angle_brackets(refs).into_iter().rev());
    }

    let mut out: Vec<MessageIdHash> = Vec::with_capacity(chain.len());
    for hash in chain.iter().filter_map(|id| MessageIdHash::from_id(id)) {
        if Some(hash) != own && !out.contains(&hash) {
            out.push(hash);
        }
    }
    out
}

/// Flags implied by headers: attachments, and mbox Status / X-Status.
fn header_flags(headers: &RawHeaders) -> MessageFlags {
    let mut flags = MessageFlags::empty();

    let content_type = headers
        .get("content-type")
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
        .unwrap_or_default();
    let has_attachments = content_type.starts_with("multipart/mixed")
        || content_type.starts_with("multipart/related")
        || headers
            .get_all("content-disposition")
            .any(|v| v.to_lowercase().contains("attachment"));
    if has_attachments {
        flags |= MessageFlags::ATTACHMENTS;
    }

    let status = headers.get("status").unwrap_or_default();
    let x_status = headers.get("x-status").unwrap_or_default();
    for ch in status.chars().chain(x_status.chars()) {
        flags |= match ch {
            'R' => MessageFlags::SEEN,
            'A' => MessageFlags::ANSWERED,
            'F' => MessageFlags::FLAGGED,
            'D' => MessageFlags::DELETED,
            'T' => MessageFlags::DRAFT,
            _ => MessageFlags::empty(),
        };
    }
    flags
}

/// Header patterns that identify a mailing list, tried in order.
/// Group 1 is the list name, group 2 the (optional) domain.
static MAILING_LIST_RULES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        // List-Post: <mailto:gnome-hackers@gnome.org>
        ("list-post", r"[ \t]*<mailto:([^@>]+)@?([^ \n\t\r>]*)"),
        // List-Id: GNOME stuff <desktop-devel-list.gnome.org>
        ("list-id", r"[^<]*<([^.>]+)\.?([^ \n\t\r>]*)"),
        // Mailing-List: list gnome-hackers@gnome.org; contact ...
        ("mailing-list", r"[ \t]*list ([^@]+)@?([^ \n\t\r>;]*)"),
        ("originator", r"[ \t]*([^@]+)@?([^ \n\t\r>]*)"),
        // X-Mailing-List: <gnome-hackers@gnome.org> archive/latest/100
        ("x-mailing-list", r"[ \t]*<?([^@>]+)@?([^ \n\t\r>]*)"),
        ("x-loop", r"[ \t]*([^@]+)@?([^ \n\t\r>]*)"),
        ("x-list", r"[ \t]*([^@]+)@?([^ \n\t\r>]*)"),
        // Sender: owner-gnome-hackers@gnome.org
        ("sender", r"[ \t]*owner-([^@]+)@?([^ @\n\t\r>]*)"),
        // Sender: gnome-hackers-owner@gnome.org
        ("sender", r"[ \t]*([^@]+)-owner@?([^ @\n\t\r>]*)"),
        ("delivered-to", r"[ \t]*mailing list ([^@]+)@?([^ \n\t\r>]*)"),
        ("sender", r"[ \t]*<?owner-([^@>]+)@?([^ @\n\t\r>]*)"),
        ("return-path", r"[ \t]*<?owner-([^@>]+)@?([^ @\n\t\r>]*)"),
        ("x-beenthere", r"[ \t]*([^@]+)@?([^ \n\t\r>]*)"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

/// Identify the mailing list a message came through: `name@domain` or `name`.
pub fn mailing_list(headers: &RawHeaders) -> Option<String> {
    for (name, re) in MAILING_LIST_RULES.iter() {
        let Some(value) = headers.get(name) else {
            continue;
        };
        let Some(caps) = re.captures(value) else {
            continue;
        };
        let list = caps.get(1).map_or("", |m| m.as_str()).trim();
        if list.is_empty() {
            continue;
        }
        let domain = caps.get(2).map_or("", |m| m.as_str()).trim();
        return Some(if domain.is_empty() {
            list.to_string()
        } else {
            format!("{list}@{domain}")
        });
    }
    None
}

/// Join folded lines. Returns `(lowercase_name, value)` pairs; lines that
/// are neither a header nor a continuation are skipped.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                result.push((name.to_ascii_lowercase(), value.trim().to_string()));
            }
        }
    }

    result
}

fn content_type_charset(entries: &[(String, String)]) -> Option<String> {
    let content_type = entries
        .iter()
        .find(|(k, _)| k == "content-type")
        .map(|(_, v)| v)?;
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

// ─── RFC 2047 ───────────────────────────────────────────────────────

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Words that fail to decode are kept verbatim. Whitespace between two
/// adjacent encoded words is dropped (RFC 2047 §6.2).
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        match decode_one_word(&remaining[start + 2..]) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &remaining[start + 2 + consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = &remaining[start + 2..];
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=`. Returns the text and the bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded = &rest[..end];
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    let bytes = match encoding {
        "B" | "b" => decode_base64(encoded.as_bytes()),
        "Q" | "q" => decode_q_encoding(encoded),
        _ => return None,
    };
    Some((decode_charset(charset, &bytes), consumed))
}

fn b64_value(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Lenient base64: skips whitespace and junk, stops at padding.
fn decode_base64(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &c in input {
        if c == b'=' {
            break;
        }
        let Some(v) = b64_value(c) else {
            continue;
        };
        acc = (acc << 6) | u32::from(v);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    out
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => result.push(b' '),
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                        continue;
                    }
                    None => result.push(b'='),
                }
            }
            b => result.push(b),
        }
        i += 1;
    }
    result
}

/// Decode bytes using a named charset, UTF-8 lossy when unknown.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset = charset, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

// ─── Message-ID tokens ──────────────────────────────────────────────

/// First `<…>` token, or the trimmed value when there is none.
fn extract_angle_bracket(s: &str) -> String {
    extract_all_angle_brackets(s)
        .into_iter()
        .next()
        .unwrap_or_else(|| s.trim().to_string())
}

/// Every `<…>` token, in order.
fn extract_all_angle_brackets(s: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut remaining = s;
    while let Some(start) = remaining.find('<') {
        let Some(len) = remaining[start..].find('>') else {
            break;
        };
        result.push(remaining[start..=start + len].to_string());
        remaining = &remaining[start + len + 1..];
    }
    result
}

// ─── Dates ──────────────────────────────────────────────────────────

const DATE_FORMATS: [&str; 10] = [
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %Z",
    "%d %b %Y %H:%M:%S",
    "%b %d %H:%M:%S %Y",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a mail date in any of the common formats.
///
/// Supports RFC 2822, ISO 8601, IMAP `DD-MMM-YYYY`, named zones, and
/// falls back to `mail-parser` for the rest.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);
    let imap = normalize_imap_date(no_dow);
    let candidates = [
        no_dow.to_string(),
        imap.clone(),
        replace_named_tz(no_dow),
        replace_named_tz(&imap),
    ];

    for candidate in &candidates {
        for fmt in DATE_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser` parse a synthetic `Date:` header.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(fake_msg.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let Some((day, rest)) = s.split_once('-') else {
        return s.to_string();
    };
    let Some((month, rest)) = rest.split_once('-') else {
        return s.to_string();
    };
    match MONTHS.iter().find(|m| m.eq_ignore_ascii_case(month)) {
        Some(month) if day.chars().all(|c| c.is_ascii_digit()) => format!("{day} {month} {rest}"),
        _ => s.to_string(),
    }
}

/// Strip a leading `"Thu, "` or `"Thu "`.
fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim();
            }
        }
    }
    s
}

/// Replace a trailing zone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 13] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CEST", "+0200"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}
