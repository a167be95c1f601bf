pub mod io;

/// Checks whether a byte is a `tchar` (token character).
pub fn is_tchar(b: u8) -> bool {
	b.is_ascii_alphanumeric()
		|| matches!(
			b,
			b'!' | b'#'
				| b'$' | b'%'
				| b'&' | b'\''
				| b'*' | b'+'
				| b'-' | b'.'
				| b'^' | b'_'
				| b'`' | b'|'
				| b'~'
		)
}

/// Checks whether a string is a token.
pub fn is_token(name: &str) -> bool {
	!name.is_empty() && name.bytes().all(is_tchar)
}

/// Checks whether a sequence of bytes is a valid HTTP header value.
pub fn is_field_value(value: &[u8]) -> bool {
	match (value.first(), value.last()) {
		(Some(&first), Some(&last)) => {
			first != b' '
				&& first != b'\t'
				&& last != b' '
				&& last != b'\t'
				&& value.iter().all(|&b| b == b'\t' || (b >= 0x20 && b != 0x7F))
		}
		_ => true,
	}
}

/// Checks whether a string is a `request-target`.
///
/// This check is relaxed and does not check the full requirements for path validity.
pub fn is_request_target(req: &str) -> bool {
	!req.is_empty() && req.bytes().all(|b| (0x21_u8..=0x7E_u8).contains(&b))
}

/// Trims leading and trailing spaces and tabs from a header value or list element.
pub fn trim_ows(mut value: &[u8]) -> &[u8] {
	while let [b' ' | b'\t', rest @ ..] = value {
		value = rest;
	}
	while let [rest @ .., b' ' | b'\t'] = value {
		value = rest;
	}
	value
}

/// Scans the headers and determines whether a `connection` header is present and contains the
/// `close` option.
pub fn is_connection_close<'a>(headers: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> bool {
	headers
		.into_iter()
		.filter(|(name, _)| name.eq_ignore_ascii_case("connection"))
		.flat_map(|(_, value)| value.split(|b| *b == b','))
		.any(|option| trim_ows(option).eq_ignore_ascii_case(b"close"))
}

/// Returns the value of the first header named `name`, compared case-insensitively.
pub fn find_header<'a>(headers: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
	headers
		.iter()
		.find(|(n, _)| n.eq_ignore_ascii_case(name))
		.map(|(_, v)| v.as_slice())
}

/// Adapts a slice of owned header pairs into the borrowed form used by the scanning helpers.
pub fn borrowed(headers: &[(String, Vec<u8>)]) -> impl Iterator<Item = (&str, &[u8])> {
	headers.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
}
