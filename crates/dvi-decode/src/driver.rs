//! Two-pass translation of the DVI byte stream.
//!
//! The first pass reads the preamble, locates the postamble by scanning
//! backward from the end of the file, and defines every font the postamble
//! names. Font assets load on their own threads and are all awaited before
//! the second pass, so that no width lookup can ever block. The second
//! pass walks the pages in stream order, feeding each command through the
//! machine and collecting output into the document.

use crate::arith::Conversions;
use crate::document::{Document, Font, Image, Page, Rule};
use crate::font::{self, FontAsset, FontProvider, FontRegistry, GlyphTable, Resolution};
use crate::machine::{Machine, Registers};
use crate::reader::{mnemonic, Reader};
use crate::{Diag, Error, Settings, Warning};

pub(crate) fn run(
    dvi: &[u8],
    settings: &Settings,
    provider: &dyn FontProvider,
    diag: &mut Diag,
) -> Result<Document, Error> {
    let mut reader = Reader::new(dvi);
    let preamble = read_preamble(&mut reader, settings, diag)?;
    let post_location = find_postamble(&mut reader)?;
    let mut registry = FontRegistry::default();
    let mut document = Document::default();
    let postamble = read_postamble(
        &mut reader,
        post_location,
        &preamble,
        &mut registry,
        &mut document,
        settings,
        diag,
    )?;
    load_fonts(
        provider,
        &mut registry,
        &postamble.pending,
        &preamble.conv,
        settings.display_dpi,
    )?;

    let mut translator = Translator {
        reader,
        settings,
        provider,
        conv: preamble.conv,
        machine: Machine::new(
            preamble.conv,
            postamble.max_h,
            postamble.max_v,
            postamble.max_s,
        ),
        registry,
        document,
        cur_font: None,
        last_bop: -1,
        diag,
    };
    translator.reader.seek(preamble.after_pre);
    translator.translate()?;

    let mut document = translator.document;
    document.consolidate();
    Ok(document)
}

struct Preamble {
    conv: Conversions,
    numerator: i32,
    denominator: i32,
    /// The file's own magnification, before any override.
    magnification: i32,
    after_pre: usize,
}

fn read_preamble(
    reader: &mut Reader,
    settings: &Settings,
    diag: &mut Diag,
) -> Result<Preamble, Error> {
    // 53 bytes is the smallest well-formed file: preamble, empty
    // postamble, and four signature bytes.
    if reader.len() < 53 {
        return Err(Error::Truncated {
            offset: reader.len(),
        });
    }
    let op = reader.u8();
    if op != 247 {
        return Err(Error::BadPreamble { found: op });
    }
    let id = reader.u8();
    if id != 2 {
        return Err(Error::BadIdByte { found: id });
    }
    let numerator = reader.i32();
    let denominator = reader.i32();
    if numerator <= 0 || denominator <= 0 {
        return Err(Error::NonPositiveDimensions {
            numerator,
            denominator,
        });
    }
    let magnification = reader.i32();
    if magnification <= 0 {
        return Err(Error::NonPositiveMagnification { magnification });
    }
    let comment_length = reader.u8() as usize;
    reader.skip(comment_length);
    let conv = Conversions::new(
        numerator,
        denominator,
        magnification,
        settings.magnification,
        settings.display_dpi,
    );
    if settings.debug {
        diag.trace(
            0,
            &format!(
                "pre: mag {}, {:.8} pixels per DVI unit ({:.8} unmagnified)",
                conv.magnification, conv.conv, conv.true_conv,
            ),
        );
    }
    Ok(Preamble {
        conv,
        numerator,
        denominator,
        magnification,
        after_pre: reader.cursor(),
    })
}

/// Find the postamble by scanning backward from the end of the file past
/// the 223 signature bytes and following the pointer stored before them.
fn find_postamble(reader: &mut Reader) -> Result<usize, Error> {
    let len = reader.len();
    let mut k = len - 1;
    let mut signature_bytes = 0;
    while k > 0 && reader.byte_at(k) == 223 {
        k -= 1;
        signature_bytes += 1;
    }
    if signature_bytes < 4 {
        return Err(Error::InsufficientTrailer {
            count: signature_bytes,
        });
    }
    let id = reader.byte_at(k);
    if id != 2 {
        return Err(Error::BadIdByte { found: id });
    }
    if k < 4 {
        return Err(Error::Truncated { offset: k });
    }
    reader.seek(k - 4);
    let pointer = reader.i32();
    if pointer < 0 || pointer as usize > len - 33 {
        return Err(Error::BadPostamblePointer { pointer });
    }
    reader.seek(pointer as usize);
    let op = reader.u8();
    if op != 248 {
        return Err(Error::BadPostambleMarker {
            offset: pointer as usize,
            found: op,
        });
    }
    Ok(pointer as usize)
}

struct Postamble {
    max_v: i32,
    max_h: i32,
    max_s: u16,
    /// Registry indices of the fonts whose assets still need loading.
    pending: Vec<usize>,
}

fn read_postamble(
    reader: &mut Reader,
    post_location: usize,
    preamble: &Preamble,
    registry: &mut FontRegistry,
    document: &mut Document,
    settings: &Settings,
    diag: &mut Diag,
) -> Result<Postamble, Error> {
    let _final_bop = reader.i32();
    for (field, preamble_value) in [
        ("numerator", preamble.numerator),
        ("denominator", preamble.denominator),
        ("magnification", preamble.magnification),
    ] {
        let postamble_value = reader.i32();
        if postamble_value != preamble_value {
            diag.warn(Warning::PostambleFieldMismatch {
                field,
                preamble: preamble_value,
                postamble: postamble_value,
            });
        }
    }
    let max_v = reader.i32();
    let max_h = reader.i32();
    let max_s = reader.u16() as u16;
    let total_pages = reader.u16();
    if settings.debug {
        diag.trace(
            post_location,
            &format!("post: {total_pages} pages, max stack depth {max_s}"),
        );
    }

    let mut pending = Vec::new();
    let regs = Registers::default();
    loop {
        let offset = reader.cursor();
        if offset >= reader.len() {
            return Err(Error::Truncated { offset });
        }
        let op = reader.u8();
        match op {
            // nop
            138 => {}
            // fnt_def1-fnt_def4
            243..=246 => {
                let number = reader.first_param(op, &regs);
                let def = font::read_font_def(reader, number);
                if let Some(index) = define_and_record(registry, document, def, &preamble.conv, diag)
                {
                    pending.push(index);
                }
            }
            // post_post
            249 => break,
            _ => {
                return Err(Error::IllegalCommandInSkip {
                    offset,
                    op_code: op,
                })
            }
        }
    }

    let pointer = reader.i32();
    if pointer != post_location as i32 {
        return Err(Error::BadPostamblePointer { pointer });
    }
    let id = reader.u8();
    if id != 2 {
        return Err(Error::BadIdByte { found: id });
    }
    let mut signature_bytes = 0;
    while reader.cursor() < reader.len() && reader.byte_at(reader.cursor()) == 223 {
        reader.skip(1);
        signature_bytes += 1;
    }
    if signature_bytes < 4 {
        diag.warn(Warning::SignatureByteCountTooLow {
            count: signature_bytes,
        });
    }

    Ok(Postamble {
        max_v,
        max_h,
        max_s,
        pending,
    })
}

/// Define a font and record it in the document's font list.
fn define_and_record(
    registry: &mut FontRegistry,
    document: &mut Document,
    def: font::FontDef,
    conv: &Conversions,
    diag: &mut Diag,
) -> Option<usize> {
    let index = registry.define(def, conv, diag)?;
    let font = registry.get(index);
    document.fonts.push(Font {
        number: font.def.number,
        name: font.def.name.clone(),
        path: font.def.dir.clone(),
        features: font.def.features.clone(),
    });
    Some(index)
}

/// Load the assets of every pending font, one thread per font, and
/// install them. Nothing else runs until all loads are done.
fn load_fonts(
    provider: &dyn FontProvider,
    registry: &mut FontRegistry,
    pending: &[usize],
    conv: &Conversions,
    display_dpi: f64,
) -> Result<(), Error> {
    let jobs: Vec<(usize, String, String)> = pending
        .iter()
        .map(|&index| {
            let def = &registry.get(index).def;
            (index, def.name.clone(), def.dir.clone())
        })
        .collect();
    let results: Vec<(usize, Result<(FontAsset, GlyphTable), String>)> =
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(|(index, name, dir)| {
                    scope.spawn(move || (index, load_assets(provider, &name, &dir)))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("font load thread panicked"))
                .collect()
        });
    for (index, result) in results {
        match result {
            Ok((asset, table)) => registry.install(index, asset, table, conv, display_dpi),
            Err(message) => {
                return Err(Error::FontLoadFailed {
                    font: registry.get(index).def.name.clone(),
                    message,
                })
            }
        }
    }
    Ok(())
}

fn load_assets(
    provider: &dyn FontProvider,
    name: &str,
    dir: &str,
) -> Result<(FontAsset, GlyphTable), String> {
    let asset = provider.font_asset(name, dir)?;
    let table = provider.glyph_table(name)?;
    Ok((asset, table))
}

struct Translator<'a, 'b, 'c> {
    reader: Reader<'a>,
    settings: &'b Settings,
    provider: &'b dyn FontProvider,
    conv: Conversions,
    machine: Machine,
    registry: FontRegistry,
    document: Document,
    /// Registry index of the current font. Undefined at page start.
    cur_font: Option<usize>,
    /// Offset of the previous `bop`, for checking back pointers.
    last_bop: i32,
    diag: &'b mut Diag<'c>,
}

impl Translator<'_, '_, '_> {
    /// Scan for pages until the postamble.
    fn translate(&mut self) -> Result<(), Error> {
        loop {
            let offset = self.reader.cursor();
            if offset >= self.reader.len() {
                return Err(Error::Truncated { offset });
            }
            let op = self.reader.u8();
            match op {
                // nop
                138 => {}
                // bop
                139 => self.translate_page(offset)?,
                // fnt_def1-fnt_def4
                243..=246 => {
                    let number = self.reader.first_param(op, &self.machine.regs);
                    self.font_def(number, offset)?;
                }
                // post
                248 => {
                    if self.settings.debug {
                        self.diag.trace(offset, "post");
                    }
                    return Ok(());
                }
                // eop, pre, post_post, and the undefined opcodes
                140 | 247 | 249..=255 => {
                    return Err(Error::IllegalCommandInSkip {
                        offset,
                        op_code: op,
                    })
                }
                _ => {
                    return Err(Error::MissingBeginPage {
                        offset,
                        op_code: op,
                    })
                }
            }
        }
    }

    fn translate_page(&mut self, bop_offset: usize) -> Result<(), Error> {
        let mut counts = [0i32; 10];
        for count in &mut counts {
            *count = self.reader.i32();
        }
        let previous = self.reader.i32();
        if self.settings.debug {
            self.diag
                .trace(bop_offset, &format!("bop c0={} prev={}", counts[0], previous));
        }
        if previous != self.last_bop {
            self.diag.warn(Warning::NonMatchingBackpointer {
                offset: bop_offset,
                found: previous,
                expected: self.last_bop,
            });
        }
        self.last_bop = bop_offset as i32;
        self.machine.begin_page();
        self.cur_font = None;
        let mut page = Page::default();

        loop {
            let offset = self.reader.cursor();
            if offset >= self.reader.len() {
                return Err(Error::PageEndedWithoutEop { offset });
            }
            let op = self.reader.u8();
            let p = self.reader.first_param(op, &self.machine.regs);
            if self.settings.debug {
                self.diag.trace(offset, &mnemonic(op));
            }
            match op {
                // setchar and set1-set4
                0..=131 => self.typeset(p, true, offset, &mut page),
                // set_rule: p is the height, the width follows
                132 => {
                    let width = self.reader.i32();
                    self.rule(p, width, true, &mut page);
                }
                // put1-put4
                133..=136 => self.typeset(p, false, offset, &mut page),
                // put_rule
                137 => {
                    let width = self.reader.i32();
                    self.rule(p, width, false, &mut page);
                }
                // nop
                138 => {}
                139 => return Err(Error::BeginPageWithinPage { offset }),
                // eop
                140 => {
                    let depth = self.machine.stack_depth();
                    if depth > 0 {
                        return Err(Error::NonEmptyStackAtEndOfPage { depth });
                    }
                    self.document.pages.push(page);
                    return Ok(());
                }
                141 => self.machine.push(offset, self.diag)?,
                142 => self.machine.pop(offset)?,
                // right1-right4
                143..=146 => self.horizontal(p),
                // w0 and w1-w4
                147..=151 => {
                    self.machine.regs.w = p;
                    self.horizontal(p);
                }
                // x0 and x1-x4
                152..=156 => {
                    self.machine.regs.x = p;
                    self.horizontal(p);
                }
                // down1-down4
                157..=160 => self.vertical(p),
                // y0 and y1-y4
                161..=165 => {
                    self.machine.regs.y = p;
                    self.vertical(p);
                }
                // z0 and z1-z4
                166..=170 => {
                    self.machine.regs.z = p;
                    self.vertical(p);
                }
                // fnt_num_0-fnt_num_63 and fnt1-fnt4
                171..=238 => self.select_font(p, offset),
                // xxx1-xxx4: p is the payload length
                239..=242 => self.special(p, offset, &mut page),
                // fnt_def1-fnt_def4
                243..=246 => self.font_def(p, offset)?,
                247..=249 => {
                    return Err(Error::PreOrPostWithinPage {
                        offset,
                        op_code: op,
                    })
                }
                250..=255 => self.diag.warn(Warning::UndefinedOpCode {
                    offset,
                    op_code: op,
                }),
            }
        }
    }

    fn font_space(&self) -> i32 {
        self.cur_font
            .map(|index| self.registry.get(index).space)
            .unwrap_or(0)
    }

    fn horizontal(&mut self, p: i32) {
        let space = self.font_space();
        self.machine.out_space(p, space, self.diag);
    }

    fn vertical(&mut self, p: i32) {
        let space = self.font_space();
        self.machine.move_down(p, space, self.diag);
    }

    fn select_font(&mut self, number: i32, offset: usize) {
        match self.registry.position(number) {
            Some(index) => self.cur_font = Some(index),
            None => {
                self.cur_font = None;
                self.diag
                    .warn(Warning::UndefinedFontSelected { offset, number });
            }
        }
    }

    /// Typeset a character: resolve it to a glyph, place the glyph at the
    /// current pixel position, and for the set variants advance past it.
    fn typeset(&mut self, parameter: i32, advance: bool, offset: usize, page: &mut Page) {
        let Some(font_index) = self.cur_font else {
            self.diag.warn(Warning::NoFontSelected { offset });
            return;
        };
        let font = self.registry.get(font_index);
        let glyph = match font.resolve(parameter) {
            Resolution::Glyph(glyph) => glyph,
            Resolution::OutOfRange(index) => {
                let warning = Warning::InvalidGlyph {
                    font: font.def.name.clone(),
                    parameter,
                    index,
                };
                self.diag.warn(warning);
                0 // .notdef
            }
            Resolution::Missing => {
                let warning = Warning::UnknownCharCode {
                    font: font.def.name.clone(),
                    parameter,
                };
                self.diag.warn(warning);
                // The character still "advances", by width zero, which
                // moves nothing.
                return;
            }
        };
        let font = self.registry.get(font_index);
        page.place(
            font.def.number,
            glyph,
            font.pixel_size,
            self.machine.regs.hh,
            self.machine.regs.vv,
        );
        if advance {
            let width = font.width(glyph);
            let pixel_width = font.pixel_width(glyph);
            self.machine.advance(width, pixel_width, self.diag);
        }
    }

    /// Typeset a rule of the given DVI-unit height and width. Nothing is
    /// emitted unless both are positive, but `set_rule` moves right by the
    /// width either way.
    fn rule(&mut self, height: i32, width: i32, move_h: bool, page: &mut Page) {
        if height > 0 && width > 0 {
            let pixel_width = self.conv.rule_pixels(width);
            let pixel_height = self.conv.rule_pixels(height);
            page.rules.push(Rule {
                x: self.machine.regs.hh,
                // DVI rules sit on the baseline; the document is top-left
                // anchored.
                y: self.machine.regs.vv - pixel_height,
                width: pixel_width,
                height: pixel_height,
            });
            if move_h {
                self.machine.advance(width, pixel_width, self.diag);
            }
        } else if move_h {
            self.machine.move_right(width, self.diag);
        }
    }

    /// Process a font definition found in the page stream. Definitions
    /// repeated from the postamble are checked against it; a font the
    /// postamble missed is defined and its assets are loaded on the spot.
    fn font_def(&mut self, number: i32, offset: usize) -> Result<(), Error> {
        let def = font::read_font_def(&mut self.reader, number);
        if self.settings.debug {
            self.diag
                .trace(offset, &format!("fnt_def {number}: {}", def.name));
        }
        let Some(index) =
            define_and_record(&mut self.registry, &mut self.document, def, &self.conv, self.diag)
        else {
            return Ok(());
        };
        let (name, dir) = {
            let def = &self.registry.get(index).def;
            (def.name.clone(), def.dir.clone())
        };
        match load_assets(self.provider, &name, &dir) {
            Ok((asset, table)) => {
                self.registry
                    .install(index, asset, table, &self.conv, self.settings.display_dpi);
                Ok(())
            }
            Err(message) => Err(Error::FontLoadFailed {
                font: name,
                message,
            }),
        }
    }

    /// Process an `xxx` special. The only special this decoder interprets
    /// is `PSfile=`, which places an encapsulated PostScript image.
    fn special(&mut self, length: i32, offset: usize, page: &mut Page) {
        let payload = self.reader.bytes(length.max(0) as usize);
        if self.settings.debug {
            self.diag.trace(
                offset,
                &format!("xxx '{}'", String::from_utf8_lossy(payload)),
            );
        }
        if payload.starts_with(b"PSfile=") {
            let text = String::from_utf8_lossy(payload).into_owned();
            self.image_special(&text, page);
            return;
        }
        if let Some(&byte) = payload.iter().find(|&&b| !(0o40..=0o176).contains(&b)) {
            self.diag
                .warn(Warning::NonPrintableInSpecial { offset, byte });
        }
    }

    fn image_special(&mut self, text: &str, page: &mut Page) {
        let Some(special) = PsFileSpecial::parse(text) else {
            return;
        };
        if special.urx <= special.llx || special.ury <= special.lly {
            self.diag.warn(Warning::DegenerateImageBox {
                file_name: special.file_name,
            });
            return;
        }
        let width_scale = if special.rwi == 0 {
            1.0
        } else {
            (special.rwi as f64 / 10.0) / (special.urx - special.llx) as f64
        };
        let height_scale = if special.rhi == 0 {
            width_scale
        } else {
            (special.rhi as f64 / 10.0) / (special.ury - special.lly) as f64
        };
        let pixel_scale =
            (self.settings.display_dpi / 72.0) * (self.conv.magnification as f64 / 1000.0);
        let width =
            ((special.urx - special.llx) as f64 * width_scale * pixel_scale).floor() as i32;
        let height =
            ((special.ury - special.lly) as f64 * height_scale * pixel_scale).floor() as i32;
        page.images.push(Image {
            file_name: special.file_name,
            x: self.machine.regs.hh,
            y: self.machine.regs.vv - height,
            width,
            height,
        });
    }
}

/// A parsed `PSfile` special: a quoted file name followed by `key=value`
/// tokens. Unrecognized tokens are skipped.
#[derive(Debug, Default, PartialEq, Eq)]
struct PsFileSpecial {
    file_name: String,
    llx: i32,
    lly: i32,
    urx: i32,
    ury: i32,
    /// Desired width in tenths of a point; 0 means natural size.
    rwi: i32,
    /// Desired height in tenths of a point; 0 means derive from the width.
    rhi: i32,
}

impl PsFileSpecial {
    fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix("PSfile=")?;
        let mut tokens = rest.split(' ').filter(|t| !t.is_empty());
        let name = tokens.next()?;
        let name = name.strip_prefix('"').unwrap_or(name);
        let name = name.strip_suffix('"').unwrap_or(name);
        let mut special = PsFileSpecial {
            file_name: name.to_string(),
            ..Default::default()
        };
        for token in tokens {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            let Ok(value) = value.parse::<i32>() else {
                continue;
            };
            match key {
                "llx" => special.llx = value,
                "lly" => special.lly = value,
                "urx" => special.urx = value,
                "ury" => special.ury = value,
                "rwi" => special.rwi = value,
                "rhi" => special.rhi = value,
                _ => {}
            }
        }
        Some(special)
    }
}
