//! Glob pattern matching as used for symbol and section name filters. Supports `*`, `?`,
//! backslash escapes and POSIX-style bracket expressions with `^` negation and ranges. No brace
//! or alternation syntax.
//!
//! Patterns are compiled once into a sequence of elements and can then be matched many times.
//! Matching operates on raw bytes with no UTF-8 awareness, since symbol names are byte strings.

/// A compiled pattern.
#[derive(Debug)]
pub struct Glob {
    elements: Vec<Element>,
}

#[derive(Debug)]
enum Element {
    /// A run of bytes that must match literally. Adjacent literal bytes always coalesce into a
    /// single element.
    Literal(Vec<u8>),
    /// `*`: any run of zero or more bytes.
    Star,
    /// `?`: exactly one byte.
    Question,
    /// `[...]`: exactly one byte from the set.
    Bracket(CharSet),
}

/// Membership set over all 256 byte values.
#[derive(Clone, Copy, Debug, Default)]
struct CharSet {
    bits: [u64; 4],
}

/// Patterns longer than this fail to compile. The matcher recurses once per `*` element, so this
/// also bounds recursion depth on hostile patterns.
const MAX_PATTERN_LEN: usize = 4096;

impl CharSet {
    fn insert(&mut self, byte: u8) {
        self.bits[usize::from(byte >> 6)] |= 1 << (byte & 63);
    }

    fn contains(&self, byte: u8) -> bool {
        self.bits[usize::from(byte >> 6)] & (1 << (byte & 63)) != 0
    }

    fn negate(&mut self) {
        for word in &mut self.bits {
            *word = !*word;
        }
    }
}

impl Glob {
    /// Compiles `pattern`, returning `None` if it's invalid: an unterminated bracket expression,
    /// a range whose end precedes its start, or a trailing backslash. Callers decide whether an
    /// invalid pattern is fatal.
    pub fn compile(pattern: &str) -> Option<Glob> {
        if pattern.len() > MAX_PATTERN_LEN {
            return None;
        }
        let mut pat = pattern.as_bytes();
        let mut elements: Vec<Element> = Vec::new();
        while let Some((&byte, rest)) = pat.split_first() {
            pat = rest;
            match byte {
                b'[' => elements.push(Element::Bracket(compile_bracket(&mut pat)?)),
                b'?' => elements.push(Element::Question),
                b'*' => elements.push(Element::Star),
                b'\\' => {
                    let (&escaped, rest) = pat.split_first()?;
                    pat = rest;
                    push_literal(&mut elements, escaped);
                }
                _ => push_literal(&mut elements, byte),
            }
        }
        Some(Glob { elements })
    }

    /// Returns whether `text` matches the whole pattern.
    pub fn matches(&self, text: &[u8]) -> bool {
        matches_elements(text, &self.elements)
    }
}

fn push_literal(elements: &mut Vec<Element>, byte: u8) {
    if let Some(Element::Literal(literal)) = elements.last_mut() {
        literal.push(byte);
    } else {
        elements.push(Element::Literal(vec![byte]));
    }
}

/// Parses a bracket expression. The leading `[` has already been consumed. A few examples:
///
/// `[abc]`: a, b or c
/// `[$\]!]`: $, ] or !
/// `[a-czg-i]`: a, b, c, z, g, h or i
/// `[^a-z]`: any byte except lowercase letters
fn compile_bracket(pat: &mut &[u8]) -> Option<CharSet> {
    let mut set = CharSet::default();
    let mut negate = false;
    if let Some(rest) = pat.strip_prefix(b"^") {
        negate = true;
        *pat = rest;
    }
    let mut closed = false;
    while !pat.is_empty() {
        if pat[0] == b']' {
            *pat = &pat[1..];
            closed = true;
            break;
        }
        if pat[0] == b'\\' {
            *pat = &pat[1..];
            if pat.is_empty() {
                return None;
            }
        }
        if pat.len() >= 3 && pat[1] == b'-' {
            let start = pat[0];
            let mut end = pat[2];
            *pat = &pat[3..];
            // The end of a range may itself be escaped, e.g. `[!-\]]`.
            if end == b'\\' {
                end = *pat.first()?;
                *pat = &pat[1..];
            }
            if end < start {
                return None;
            }
            for byte in start..=end {
                set.insert(byte);
            }
        } else {
            set.insert(pat[0]);
            *pat = &pat[1..];
        }
    }
    if !closed {
        return None;
    }
    if negate {
        set.negate();
    }
    Some(set)
}

fn matches_elements(mut text: &[u8], mut elements: &[Element]) -> bool {
    while let Some((element, rest)) = elements.split_first() {
        elements = rest;
        match element {
            Element::Literal(literal) => {
                let Some(remaining) = text.strip_prefix(literal.as_slice()) else {
                    return false;
                };
                text = remaining;
            }
            Element::Star => {
                if elements.is_empty() {
                    return true;
                }
                // Patterns like "*foo*bar*" are much more common than ones like "*foo*[abc]*",
                // so the case where a literal follows the star is optimised: scan for each
                // occurrence of the literal rather than trying every split point.
                if let Element::Literal(literal) = &elements[0] {
                    while let Some(pos) = memchr::memmem::find(text, literal) {
                        if matches_elements(&text[pos + literal.len()..], &elements[1..]) {
                            return true;
                        }
                        text = &text[pos + 1..];
                    }
                    return false;
                }
                return (0..=text.len()).any(|split| matches_elements(&text[split..], elements));
            }
            Element::Question => {
                if text.is_empty() {
                    return false;
                }
                text = &text[1..];
            }
            Element::Bracket(set) => match text.split_first() {
                Some((&byte, rest)) if set.contains(byte) => text = rest,
                _ => return false,
            },
        }
    }
    text.is_empty()
}
