//! Presentation format: `<owner> <ttl> <TYPE> <value...>`.

use std::fmt;
use std::str::FromStr;

use hickory_proto::rr::{Name, RecordType};

use super::ttl::TimeToLive;
use super::value::RecordValue;
use crate::error::ProtocolError;

/// Render a record as a single line, e.g. `www.example.com. 300 A 192.0.2.1`.
pub fn encode(owner: &Name, ttl: TimeToLive, value: &RecordValue) -> String {
    format!("{owner} {ttl} {} {value}", value.record_type())
}

/// Parse a line produced by [`encode`]. A class of `IN` may follow the TTL.
pub fn parse_record(line: &str) -> Result<(Name, TimeToLive, RecordValue), ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedRecord {
        text: line.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = line.trim_start();
    let mut next = || {
        let (field, tail) = split_field(rest);
        rest = tail;
        field
    };

    let owner = next().ok_or_else(|| malformed("missing owner"))?;
    if !owner.ends_with('.') {
        return Err(ProtocolError::NotFullyQualified(owner.to_string()));
    }
    let owner = Name::from_str(owner)?;

    let ttl = next()
        .ok_or_else(|| malformed("missing ttl"))?
        .parse::<TimeToLive>()
        .map_err(|_| malformed("ttl is not a number"))?;

    let mut rtype = next().ok_or_else(|| malformed("missing type"))?;
    if rtype.eq_ignore_ascii_case("IN") {
        rtype = next().ok_or_else(|| malformed("missing type"))?;
    }
    let rtype = RecordType::from_str(&rtype.to_ascii_uppercase())
        .map_err(|_| malformed("unknown record type"))?;

    let value = RecordValue::parse(rtype, rest)?;
    Ok((owner, ttl, value))
}

fn split_field(input: &str) -> (Option<&str>, &str) {
    let input = input.trim_start();
    if input.is_empty() {
        return (None, input);
    }
    match input.find(char::is_whitespace) {
        Some(end) => (Some(&input[..end]), &input[end..]),
        None => (Some(input), ""),
    }
}

/// Split value fields on whitespace, honoring double quotes and backslash
/// escapes inside them.
pub(crate) fn tokenize(input: &str) -> Result<Vec<String>, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::MalformedRecord {
        text: input.to_string(),
        reason: reason.to_string(),
    };

    let mut fields = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut field = String::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => field.push(chars.next().ok_or_else(|| malformed("dangling escape"))?),
                    Some(c) => field.push(c),
                    None => return Err(malformed("unterminated quoted string")),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                field.push(c);
                chars.next();
            }
        }
        fields.push(field);
    }
    Ok(fields)
}

pub(crate) fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in text.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

/// Strip leading zeros from each dotted-decimal octet: `010.000.000.001`
/// becomes `10.0.0.1`. Anything that is not four numeric octets is returned
/// unchanged.
pub fn normalize_ipv4(address: &str) -> String {
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() != 4
        || octets
            .iter()
            .any(|octet| octet.is_empty() || !octet.bytes().all(|b| b.is_ascii_digit()))
    {
        return address.to_string();
    }

    octets
        .iter()
        .map(|octet| match octet.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Compare two IPv4 literals, ignoring zero padding.
pub fn ipv4_eq(a: &str, b: &str) -> bool {
    normalize_ipv4(a) == normalize_ipv4(b)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn name(text: &str) -> Name {
        Name::from_str(text).unwrap()
    }

    #[test]
    fn zero_padding_is_ignored_for_comparison() {
        assert!(ipv4_eq("192.168.000.001", "192.168.0.1"));
        assert!(ipv4_eq("010.0.0.1", "10.000.0.001"));
        assert!(!ipv4_eq("192.168.0.10", "192.168.0.1"));
        assert_eq!(normalize_ipv4("000.000.000.000"), "0.0.0.0");
        assert_eq!(normalize_ipv4("not.an.ip"), "not.an.ip");
    }

    #[test]
    fn encoding_does_not_pad() {
        let value = RecordValue::parse(RecordType::A, "192.168.000.001").unwrap();
        assert_eq!(
            encode(&name("host.example.com."), TimeToLive::from_secs(60), &value),
            "host.example.com. 60 A 192.168.0.1"
        );
    }

    #[test]
    fn encoded_records_parse_back() {
        let cases = [
            (RecordType::A, "192.0.2.7"),
            (RecordType::AAAA, "2001:db8::7"),
            (RecordType::CNAME, "alias.example.com."),
            (RecordType::MX, "20 mx2.example.com."),
            (RecordType::NS, "ns2.example.com."),
            (RecordType::PTR, "host.example.com."),
            (RecordType::SRV, "0 100 443 svc.example.com."),
            (RecordType::TXT, r#""hello world" "with \"quotes\"""#),
            (RecordType::CAA, r#"0 iodef "mailto:ops@example.com""#),
        ];
        let owner = name("r.example.com.");

        for (rtype, text) in cases {
            let value = RecordValue::parse(rtype, text).unwrap();
            let line = encode(&owner, TimeToLive::from_secs(3600), &value);
            let (parsed_owner, ttl, parsed) = parse_record(&line).unwrap();
            assert_eq!(parsed_owner, owner);
            assert_eq!(ttl, TimeToLive::from_secs(3600));
            assert_eq!(parsed, value, "{line}");
        }
    }

    #[test]
    fn accepts_class_and_lowercase_type() {
        let (_, ttl, value) = parse_record("www.example.com. 300 IN a 192.0.2.1").unwrap();
        assert_eq!(ttl, TimeToLive::from_secs(300));
        assert_eq!(value, RecordValue::A(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[test]
    fn rejects_incomplete_lines() {
        assert!(parse_record("").is_err());
        assert!(parse_record("www.example.com. 300").is_err());
        assert!(parse_record("www.example.com. soon A 192.0.2.1").is_err());
        assert!(matches!(
            parse_record("www 300 A 192.0.2.1"),
            Err(ProtocolError::NotFullyQualified(_))
        ));
    }

    #[test]
    fn tokenizer_handles_quotes() {
        assert_eq!(
            tokenize(r#"  a "b c"  "d\\e" "#).unwrap(),
            vec!["a".to_string(), "b c".into(), r"d\e".into()]
        );
        assert!(tokenize(r#""open"#).is_err());
    }
}
