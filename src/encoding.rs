use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::{DecoderResult, Encoding, UTF_8};
use regex::bytes::Regex;

const SNIFF_LIMIT: usize = 4096;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([A-Za-z0-9_:.\-]+)"#)
        .expect("meta charset regex is valid")
});

/// Decoded page text together with the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    pub lossy: bool,
}

/// Extracts the `charset` parameter of a `Content-Type` header value.
pub fn charset_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches(['"', '\'']);
        (!value.is_empty()).then_some(value)
    })
}

/// Guesses the encoding from the bytes alone: byte order mark, then `<meta>` declarations.
pub fn sniff_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some(encoding);
    }
    let head = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    let captures = META_CHARSET.captures(head)?;
    Encoding::for_label(captures.get(1)?.as_bytes())
}

/// Statistical guess for pages that declare nothing. `None` for pure ASCII, which
/// UTF-8 already covers.
pub fn detect_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let mut detector = EncodingDetector::new();
    if !detector.feed(bytes, true) {
        return None;
    }
    Some(detector.guess(None, true))
}

fn without_bom<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> &'a [u8] {
    match Encoding::for_bom(bytes) {
        Some((bom_encoding, len)) if bom_encoding == encoding => &bytes[len..],
        _ => bytes,
    }
}

/// Decodes without replacement; `None` when the bytes are not valid in `encoding`.
pub fn decode_strict(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(without_bom(bytes, encoding))
        .map(|text| text.into_owned())
}

/// Decodes dropping every byte sequence that is not valid in `encoding`. Characters
/// that are really in the text, U+FFFD included, are kept.
pub fn decode_ignoring_errors(bytes: &[u8], encoding: &'static Encoding) -> String {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut rest = without_bom(bytes, encoding);
    let mut text = String::with_capacity(
        decoder
            .max_utf8_buffer_length_without_replacement(rest.len())
            .unwrap_or(rest.len()),
    );
    loop {
        let (result, read) = decoder.decode_to_string_without_replacement(rest, &mut text, true);
        rest = &rest[read..];
        match result {
            DecoderResult::InputEmpty => return text,
            // The malformed bytes are already consumed; carry on after them.
            DecoderResult::Malformed(_, _) => {}
            DecoderResult::OutputFull => {
                let needed = decoder
                    .max_utf8_buffer_length_without_replacement(rest.len())
                    .unwrap_or(rest.len());
                text.reserve(needed.max(4));
            }
        }
    }
}

/// Resolution order: header charset, BOM or `<meta>` charset, statistical detection,
/// UTF-8 ignoring errors. A candidate that does not decode cleanly falls through.
pub fn decode_page(bytes: &[u8], content_type: Option<&str>) -> DecodedText {
    let declared = content_type
        .and_then(charset_from_content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    let candidates = [declared, sniff_encoding(bytes), detect_encoding(bytes)];
    for candidate in candidates.into_iter().flatten() {
        if let Some(text) = decode_strict(bytes, candidate) {
            return DecodedText {
                text,
                encoding: candidate.name(),
                lossy: false,
            };
        }
        tracing::debug!(encoding = candidate.name(), "candidate encoding failed");
    }

    if let Some(text) = decode_strict(bytes, UTF_8) {
        return DecodedText {
            text,
            encoding: UTF_8.name(),
            lossy: false,
        };
    }

    DecodedText {
        text: decode_ignoring_errors(bytes, UTF_8),
        encoding: UTF_8.name(),
        lossy: true,
    }
}

/// Decodes a stored payload with its recorded encoding label.
pub fn decode_with_label(bytes: &[u8], label: Option<&str>) -> DecodedText {
    let encoding = label
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    match decode_strict(bytes, encoding) {
        Some(text) => DecodedText {
            text,
            encoding: encoding.name(),
            lossy: false,
        },
        None => DecodedText {
            text: decode_ignoring_errors(bytes, encoding),
            encoding: encoding.name(),
            lossy: true,
        },
    }
}
