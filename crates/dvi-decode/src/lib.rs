//! # DVI decoding
//!
//! This crate decodes the "device independent" (DVI) files written by
//! Lua-enabled extended TeX engines into a structured [`Document`]: for
//! every page, the pixel coordinates of every glyph of every font, the
//! pixel rectangles of all typeset rules, and the placements of embedded
//! PostScript images requested by specials. The document is self-contained
//! and can be handed to any glyph renderer.
//!
//! A DVI file is a stream of 8-bit bytes forming commands in a machine-like
//! language: an operation code followed by zero or more big-endian
//! parameters. The file starts with a preamble that defines the unit of
//! measurement, continues with the pages, and ends with a postamble that
//! summarizes the file and repeats all font definitions. Decoding runs in
//! two passes. The first pass reads the preamble, finds the postamble by
//! scanning backward from the end of the file past the 223-valued signature
//! bytes, and loads every font the postamble defines; loads run on their
//! own threads and are all awaited before translation begins. The second
//! pass translates the pages in stream order.
//!
//! The engines this crate targets do not put character codes in their DVI
//! files directly. Each font's character parameters are resolved through a
//! per-font description table written by the engine alongside the document
//! (see [`GlyphTable`]), which maps them to glyphs of an external OpenType
//! font. Parsing that font is the caller's business: the decoder asks a
//! [`FontProvider`] for the handful of facts it needs ([`FontAsset`]).
//!
//! ```
//! use dvi_decode::{decode, MemoryProvider, Settings};
//!
//! // The smallest well-formed file: a preamble, an empty postamble, and
//! // the signature trailer.
//! let mut dvi: Vec<u8> = vec![247, 2];
//! dvi.extend(25400000i32.to_be_bytes()); // numerator
//! dvi.extend(473628672i32.to_be_bytes()); // denominator
//! dvi.extend(1000i32.to_be_bytes()); // magnification
//! dvi.push(0); // no comment
//! let post = dvi.len() as i32;
//! dvi.push(248);
//! dvi.extend((-1i32).to_be_bytes()); // no final bop
//! dvi.extend(25400000i32.to_be_bytes());
//! dvi.extend(473628672i32.to_be_bytes());
//! dvi.extend(1000i32.to_be_bytes());
//! dvi.extend([0; 12]); // max v, max h, max stack depth, total pages
//! dvi.push(249);
//! dvi.extend(post.to_be_bytes());
//! dvi.push(2);
//! dvi.extend([223; 4]);
//!
//! let mut diagnostics: Vec<String> = Vec::new();
//! let (result, warnings) = decode(
//!     &dvi,
//!     &Settings::default(),
//!     &MemoryProvider::new(),
//!     &mut diagnostics,
//! );
//! let document = result.unwrap();
//! assert_eq!(document.fonts, vec![]);
//! assert_eq!(document.pages, vec![]);
//! assert_eq!(warnings, vec![]);
//! ```

mod arith;
mod document;
mod driver;
mod font;
mod machine;
mod reader;

pub use document::{Document, Font, Glyph, GlyphSize, Image, Page, PageFont, Placement, Rule};
pub use font::{FontAsset, FontProvider, GlyphDescription, GlyphTable, MemoryProvider, Unicode};

/// Decode settings.
///
/// The font-name to path mapping the decoder's caller usually carries is
/// not here: it lives behind the [`FontProvider`], which receives both the
/// name and the directory of each font it is asked to load.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Resolution of the target display, in pixels per inch.
    pub display_dpi: f64,
    /// If positive, overrides the magnification recorded in the file.
    pub magnification: i32,
    /// Trace every command to the diagnostic sink, prefixed with its byte
    /// offset.
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_dpi: 96.0,
            magnification: 0,
            debug: false,
        }
    }
}

/// Decode a DVI file.
///
/// Returns the decoded document, or the fatal error that ended decoding,
/// together with all non-fatal warnings encountered along the way. Each
/// warning is also rendered as a one-line message to `sink` as it occurs,
/// so hosts that stream diagnostics to a terminal see them in file order,
/// interleaved with the debug trace if [`Settings::debug`] is set.
pub fn decode(
    dvi: &[u8],
    settings: &Settings,
    provider: &dyn FontProvider,
    sink: &mut dyn DiagnosticSink,
) -> (Result<Document, Error>, Vec<Warning>) {
    let mut diag = Diag {
        warnings: Vec::new(),
        sink,
    };
    let result = driver::run(dvi, settings, provider, &mut diag);
    if let Err(err) = &result {
        diag.sink.diagnostic(&err.to_string());
    }
    (result, diag.warnings)
}

/// Receives one-line diagnostic messages during decoding.
pub trait DiagnosticSink {
    fn diagnostic(&mut self, line: &str);
}

impl DiagnosticSink for Vec<String> {
    fn diagnostic(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Sink that drops every message.
pub struct DiscardDiagnostics;

impl DiagnosticSink for DiscardDiagnostics {
    fn diagnostic(&mut self, _: &str) {}
}

/// Sink that writes each message as one line to a writer.
pub struct WriteDiagnostics<W>(pub W);

impl<W: std::io::Write> DiagnosticSink for WriteDiagnostics<W> {
    fn diagnostic(&mut self, line: &str) {
        let _ = writeln!(self.0, "{line}");
    }
}

/// Warnings and trace lines accumulated during one decode.
pub(crate) struct Diag<'a> {
    pub warnings: Vec<Warning>,
    pub sink: &'a mut dyn DiagnosticSink,
}

impl Diag<'_> {
    pub fn warn(&mut self, warning: Warning) {
        self.sink.diagnostic(&warning.message());
        self.warnings.push(warning);
    }

    pub fn trace(&mut self, offset: usize, text: &str) {
        self.sink.diagnostic(&format!("{offset}: {text}"));
    }
}

/// Error that aborts decoding.
///
/// Offsets refer to the byte position of the offending command in the DVI
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The file ended in the middle of a command, or is too short to be a
    /// DVI file at all.
    Truncated { offset: usize },
    /// The file does not start with a `pre` command carrying format 2.
    BadPreamble { found: u8 },
    /// An identification byte is not 2. Format 3 (right-to-left extended
    /// DVI) is not supported.
    BadIdByte { found: u8 },
    /// The preamble's unit fraction must be positive.
    NonPositiveDimensions { numerator: i32, denominator: i32 },
    NonPositiveMagnification { magnification: i32 },
    /// Fewer than four 223 signature bytes at the end of the file.
    InsufficientTrailer { count: usize },
    /// The postamble pointer does not point inside the file, or the
    /// `post_post` back pointer disagrees with where the postamble was.
    BadPostamblePointer { pointer: i32 },
    /// The postamble pointer does not point at a `post` command.
    BadPostambleMarker { offset: usize, found: u8 },
    /// A command that cannot appear between pages.
    IllegalCommandInSkip { offset: usize, op_code: u8 },
    /// Page-content command where only `bop`, `post`, `nop`, or a font
    /// definition may appear.
    MissingBeginPage { offset: usize, op_code: u8 },
    /// The file ended inside a page.
    PageEndedWithoutEop { offset: usize },
    BeginPageWithinPage { offset: usize },
    PreOrPostWithinPage { offset: usize, op_code: u8 },
    StackUnderflow { offset: usize },
    /// More than 100 levels of `push`.
    StackOverflow { offset: usize },
    NonEmptyStackAtEndOfPage { depth: usize },
    FontLoadFailed { font: String, message: String },
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            Truncated { offset } => {
                write!(f, "the file ended unexpectedly at byte {offset}")
            }
            BadPreamble { found } => {
                write!(f, "the first byte should be 247 (pre), not {found}")
            }
            BadIdByte { found } => {
                write!(f, "identification byte should be 2, not {found}")
            }
            NonPositiveDimensions {
                numerator,
                denominator,
            } => {
                write!(
                    f,
                    "the unit fraction {numerator}/{denominator} must be positive"
                )
            }
            NonPositiveMagnification { magnification } => {
                write!(f, "magnification {magnification} must be positive")
            }
            InsufficientTrailer { count } => {
                write!(
                    f,
                    "only {count} signature bytes at the end of the file; at least 4 are required"
                )
            }
            BadPostamblePointer { pointer } => {
                write!(f, "bad postamble pointer {pointer}")
            }
            BadPostambleMarker { offset, found } => {
                write!(f, "byte {offset} should be 248 (post), not {found}")
            }
            IllegalCommandInSkip { offset, op_code } => {
                write!(f, "illegal command {op_code} between pages at byte {offset}")
            }
            MissingBeginPage { offset, op_code } => {
                write!(f, "command {op_code} at byte {offset} where bop was expected")
            }
            PageEndedWithoutEop { offset } => {
                write!(f, "the file ended at byte {offset} inside a page")
            }
            BeginPageWithinPage { offset } => {
                write!(f, "bop at byte {offset} inside a page")
            }
            PreOrPostWithinPage { offset, op_code } => {
                write!(f, "command {op_code} at byte {offset} inside a page")
            }
            StackUnderflow { offset } => {
                write!(f, "pop with an empty stack at byte {offset}")
            }
            StackOverflow { offset } => {
                write!(f, "stack capacity exceeded at byte {offset}")
            }
            NonEmptyStackAtEndOfPage { depth } => {
                write!(f, "eop with {depth} unmatched push commands")
            }
            FontLoadFailed { font, message } => {
                write!(f, "failed to load font {font}: {message}")
            }
        }
    }
}

/// Non-fatal defect in the file. Decoding continues after each of these,
/// with the corrective action described on the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A font number was defined twice with differing parameters. The
    /// first definition is kept.
    FontRedefinitionMismatch {
        number: i32,
        field: &'static str,
        existing: String,
        incoming: String,
    },
    /// A font size outside (0, 2^27). The definition is used as is.
    SizeOutOfRange {
        font: String,
        field: &'static str,
        value: i32,
    },
    /// The stack went deeper than the postamble claimed.
    StackDepthExceedsClaim { depth: usize, claimed: usize },
    /// A position register moved more than 99 units beyond the bound the
    /// postamble claimed.
    PositionOutOfBounds {
        register: char,
        value: i32,
        bound: i32,
    },
    /// A motion would have overflowed a position register; the parameter
    /// was clamped.
    ArithmeticOverflow {
        register: char,
        parameter: i32,
        clamped: i32,
    },
    /// A `bop` back pointer does not point at the previous `bop`.
    NonMatchingBackpointer {
        offset: usize,
        found: i32,
        expected: i32,
    },
    /// The postamble repeats a preamble parameter with a different value.
    /// The preamble's value stays in effect.
    PostambleFieldMismatch {
        field: &'static str,
        preamble: i32,
        postamble: i32,
    },
    /// Opcodes 250-255 are undefined; the command is skipped.
    UndefinedOpCode { offset: usize, op_code: u8 },
    /// A character parameter resolved to a glyph the font does not have;
    /// `.notdef` was substituted.
    InvalidGlyph {
        font: String,
        parameter: i32,
        index: u32,
    },
    /// A character parameter with no entry in the font's description
    /// table; nothing was typeset.
    UnknownCharCode { font: String, parameter: i32 },
    /// A font was selected that no definition exists for.
    UndefinedFontSelected { offset: usize, number: i32 },
    /// A character or rule command before any font was selected; it was
    /// skipped.
    NoFontSelected { offset: usize },
    /// A special contains a byte outside the printable ASCII range.
    NonPrintableInSpecial { offset: usize, byte: u8 },
    /// Fewer than four 223 bytes follow the `post_post` identification
    /// byte.
    SignatureByteCountTooLow { count: usize },
    /// A `PSfile` special whose bounding box has no area; it was ignored.
    DegenerateImageBox { file_name: String },
}

impl Warning {
    /// One-line rendering, as sent to the diagnostic sink.
    pub fn message(&self) -> String {
        use Warning::*;
        match self {
            FontRedefinitionMismatch {
                number,
                field,
                existing,
                incoming,
            } => format!(
                "font {number} redefined with a different {field} \
                 ({incoming} instead of {existing}); keeping the first definition"
            ),
            SizeOutOfRange { font, field, value } => {
                format!("font {font} has implausible {field} {value}")
            }
            StackDepthExceedsClaim { depth, claimed } => {
                format!("stack depth {depth} exceeds the postamble's claim of {claimed}")
            }
            PositionOutOfBounds {
                register,
                value,
                bound,
            } => format!("|{register}| = {} exceeds the claimed bound {bound}", value.unsigned_abs()),
            ArithmeticOverflow {
                register,
                parameter,
                clamped,
            } => format!(
                "motion {parameter} would overflow {register}; clamped to {clamped}"
            ),
            NonMatchingBackpointer {
                offset,
                found,
                expected,
            } => format!(
                "bop at byte {offset} has back pointer {found}, should be {expected}"
            ),
            PostambleFieldMismatch {
                field,
                preamble,
                postamble,
            } => format!(
                "postamble {field} {postamble} does not match the preamble's {preamble}"
            ),
            UndefinedOpCode { offset, op_code } => {
                format!("undefined command {op_code} at byte {offset}")
            }
            InvalidGlyph {
                font,
                parameter,
                index,
            } => format!(
                "character {parameter} of font {font} names glyph {index}, \
                 which the font does not have"
            ),
            UnknownCharCode { font, parameter } => {
                format!("font {font} has no description for character {parameter}")
            }
            UndefinedFontSelected { offset, number } => {
                format!("font {number} selected at byte {offset} but never defined")
            }
            NoFontSelected { offset } => {
                format!("character at byte {offset} before any font was selected")
            }
            NonPrintableInSpecial { offset, byte } => {
                format!("non-printable byte {byte} in the special at byte {offset}")
            }
            SignatureByteCountTooLow { count } => {
                format!("only {count} signature bytes after post_post; TeX writes at least 4")
            }
            DegenerateImageBox { file_name } => {
                format!("image {file_name} has an empty bounding box; ignored")
            }
        }
    }
}
