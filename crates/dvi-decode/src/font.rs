//! Font definitions, external assets, and glyph resolution.
//!
//! A `fnt_def` command carries a checksum, two sizes, and a composite name
//! of the form `<path>/<basename>:<features>`. The basename identifies an
//! external OpenType font, which the decoder never parses itself: a
//! [`FontProvider`] supplied by the caller loads the asset and the
//! per-font glyph-description table, and the registry derives the width
//! tables it needs from them.
//!
//! The glyph-description table is produced by the engine that wrote the
//! DVI file. It maps each DVI character parameter (a decimal string) to
//! the glyph the shaper chose, together with the code point or, for
//! ligatures, code points it came from.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::arith::{round, Conversions};
use crate::reader::Reader;
use crate::{Diag, Warning};

/// Loads external font data on behalf of the decoder.
///
/// Implementations resolve the font name against whatever storage the host
/// has: the file system, an archive, or an in-memory table in tests (see
/// [`MemoryProvider`]). Loads for distinct fonts may run on separate
/// threads, hence the `Sync` bound.
pub trait FontProvider: Sync {
    /// Load and parse the external font asset.
    ///
    /// `dir` is the directory part of the font definition's composite
    /// name, which may be empty.
    fn font_asset(&self, name: &str, dir: &str) -> Result<FontAsset, String>;

    /// Load the glyph-description table for the named font.
    fn glyph_table(&self, name: &str) -> Result<GlyphTable, String>;
}

/// What the decoder needs from a parsed OpenType font.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FontAsset {
    /// Design units per em, from the font's head table.
    pub units_per_em: u16,
    /// Advance width of every glyph in design units, indexed by glyph.
    pub advance_widths: Vec<u16>,
    /// The character map: code point to glyph.
    pub glyph_index_map: HashMap<u32, u32>,
}

/// The per-font glyph-description table.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphTable {
    /// Keys are DVI character parameters in decimal.
    pub descriptions: HashMap<String, GlyphDescription>,
}

/// One entry of the glyph-description table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphDescription {
    /// The glyph the shaper chose.
    pub index: u32,
    /// The code point(s) behind the glyph, absent for glyphs with no
    /// direct Unicode interpretation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unicode: Option<Unicode>,
}

/// A scalar code point, or the sequence a ligature was formed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Unicode {
    Scalar(u32),
    Ligature(Vec<u32>),
}

/// In-memory provider for tests and embedded hosts.
#[derive(Default)]
pub struct MemoryProvider {
    fonts: HashMap<String, (FontAsset, GlyphTable)>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a font under the name a `fnt_def` will use.
    pub fn add(&mut self, name: &str, asset: FontAsset, table: GlyphTable) {
        self.fonts.insert(name.to_string(), (asset, table));
    }
}

impl FontProvider for MemoryProvider {
    fn font_asset(&self, name: &str, _dir: &str) -> Result<FontAsset, String> {
        match self.fonts.get(name) {
            Some((asset, _)) => Ok(asset.clone()),
            None => Err(format!("no such font: {name}")),
        }
    }

    fn glyph_table(&self, name: &str) -> Result<GlyphTable, String> {
        match self.fonts.get(name) {
            Some((_, table)) => Ok(table.clone()),
            None => Err(format!("no such font: {name}")),
        }
    }
}

/// The parsed body of a `fnt_def` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FontDef {
    pub number: i32,
    pub checksum: i32,
    pub scaled_size: i32,
    pub design_size: i32,
    pub name: String,
    pub dir: String,
    pub features: String,
}

/// Read a `fnt_def` body. The font number has already been read as the
/// command's first parameter.
pub(crate) fn read_font_def(reader: &mut Reader, number: i32) -> FontDef {
    let checksum = reader.i32();
    let scaled_size = reader.i32();
    let design_size = reader.i32();
    let dir_len = reader.u8() as usize;
    let name_len = reader.u8() as usize;
    // The engine brackets parts of the name; the brackets are not part of
    // the font name proper.
    let composite: String = reader
        .bytes(dir_len + name_len)
        .iter()
        .filter(|&&b| b != b'[' && b != b']')
        .map(|&b| b as char)
        .collect();
    let (rest, features) = match composite.split_once(':') {
        Some((rest, features)) => (rest, features.to_string()),
        None => (composite.as_str(), String::new()),
    };
    let (dir, name) = match rest.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (String::new(), rest.to_string()),
    };
    FontDef {
        number,
        checksum,
        scaled_size,
        design_size,
        name,
        dir,
        features,
    }
}

/// A defined font: the definition, the derived sizes, and, once the
/// external asset has been installed, the width tables.
#[derive(Debug, Clone)]
pub(crate) struct DviFont {
    pub def: FontDef,
    /// The size the font is used at, in printer's points.
    pub point_size: f64,
    /// The size the font is used at, in pixels.
    pub pixel_size: i32,
    /// A sixth of the scaled size (a thin space); the threshold between
    /// accumulated and resynchronized pixel motion.
    pub space: i32,
    /// Legal glyph range of the external font.
    pub bc: u32,
    pub ec: u32,
    /// Per-glyph advance in DVI units, indexed by glyph.
    pub widths: Vec<i32>,
    /// Per-glyph advance in pixels, indexed by glyph.
    pub pixel_widths: Vec<i32>,
    pub descriptions: HashMap<String, GlyphDescription>,
    pub glyph_index_map: HashMap<u32, u32>,
}

/// Outcome of resolving a DVI character parameter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The description table has no entry: nothing is typeset.
    Missing,
    Glyph(u32),
    /// The resolved index is beyond the font's last glyph; `.notdef` is
    /// substituted.
    OutOfRange(u32),
}

impl DviFont {
    /// Resolve a DVI character parameter to a glyph of the external font.
    ///
    /// Scalar code points go through the character map; ligatures and
    /// entries without a Unicode interpretation use the shaper's glyph
    /// index directly.
    pub fn resolve(&self, parameter: i32) -> Resolution {
        let description = match self.descriptions.get(&parameter.to_string()) {
            Some(d) => d,
            None => return Resolution::Missing,
        };
        let index = match &description.unicode {
            Some(Unicode::Scalar(u)) => match self.glyph_index_map.get(u) {
                Some(&mapped) => mapped,
                None => description.index,
            },
            Some(Unicode::Ligature(_)) | None => description.index,
        };
        if index < self.bc || index > self.ec {
            Resolution::OutOfRange(index)
        } else {
            Resolution::Glyph(index)
        }
    }

    pub fn width(&self, glyph: u32) -> i32 {
        self.widths.get(glyph as usize).copied().unwrap_or(0)
    }

    pub fn pixel_width(&self, glyph: u32) -> i32 {
        self.pixel_widths.get(glyph as usize).copied().unwrap_or(0)
    }
}

/// The font-number to font map, in definition order.
#[derive(Default)]
pub(crate) struct FontRegistry {
    fonts: Vec<DviFont>,
}

impl FontRegistry {
    pub fn position(&self, number: i32) -> Option<usize> {
        self.fonts.iter().position(|f| f.def.number == number)
    }

    pub fn get(&self, index: usize) -> &DviFont {
        &self.fonts[index]
    }

    /// Define a font. Returns the index of the new font, or [`None`] if
    /// the number was already defined, in which case the original
    /// definition is kept and any differing fields are reported.
    pub fn define(
        &mut self,
        def: FontDef,
        conv: &Conversions,
        diag: &mut Diag,
    ) -> Option<usize> {
        if let Some(existing) = self.position(def.number) {
            check_redefinition(&self.fonts[existing].def, &def, diag);
            return None;
        }
        const MAX_SIZE: i32 = 1 << 27;
        if def.scaled_size <= 0 || def.scaled_size >= MAX_SIZE {
            diag.warn(Warning::SizeOutOfRange {
                font: def.name.clone(),
                field: "scaled size",
                value: def.scaled_size,
            });
        }
        if def.design_size <= 0 || def.design_size >= MAX_SIZE {
            diag.warn(Warning::SizeOutOfRange {
                font: def.name.clone(),
                field: "design size",
                value: def.design_size,
            });
        }
        let point_size =
            (conv.magnification as f64 / 1000.0) * def.scaled_size as f64 / 65536.0;
        let pixel_size = conv.pixels(def.scaled_size);
        let space = def.scaled_size / 6; // a thin space, by TeX's reckoning
        self.fonts.push(DviFont {
            def,
            point_size,
            pixel_size,
            space,
            bc: 0,
            ec: 0,
            widths: vec![],
            pixel_widths: vec![],
            descriptions: HashMap::new(),
            glyph_index_map: HashMap::new(),
        });
        Some(self.fonts.len() - 1)
    }

    /// Install a loaded asset and description table, deriving the width
    /// tables.
    pub fn install(
        &mut self,
        index: usize,
        asset: FontAsset,
        table: GlyphTable,
        conv: &Conversions,
        display_dpi: f64,
    ) {
        let font = &mut self.fonts[index];
        let pixels_per_em = font.point_size * display_dpi / 72.27;
        let dvi_units_per_em = pixels_per_em / conv.conv;
        let unit_conv = if asset.units_per_em == 0 {
            0.0
        } else {
            dvi_units_per_em / asset.units_per_em as f64
        };
        font.widths = asset
            .advance_widths
            .iter()
            .map(|&advance| round(advance as f64 * unit_conv))
            .collect();
        font.pixel_widths = font
            .widths
            .iter()
            .map(|&width| if width == 0 { 0 } else { conv.pixels(width) })
            .collect();
        font.bc = 0;
        font.ec = (asset.advance_widths.len() as u32).saturating_sub(1);
        font.descriptions = table.descriptions;
        font.glyph_index_map = asset.glyph_index_map;
    }
}

fn check_redefinition(existing: &FontDef, incoming: &FontDef, diag: &mut Diag) {
    let number = existing.number;
    if existing.scaled_size != incoming.scaled_size {
        diag.warn(Warning::FontRedefinitionMismatch {
            number,
            field: "scaled size",
            existing: existing.scaled_size.to_string(),
            incoming: incoming.scaled_size.to_string(),
        });
    }
    if existing.design_size != incoming.design_size {
        diag.warn(Warning::FontRedefinitionMismatch {
            number,
            field: "design size",
            existing: existing.design_size.to_string(),
            incoming: incoming.design_size.to_string(),
        });
    }
    if existing.name != incoming.name {
        diag.warn(Warning::FontRedefinitionMismatch {
            number,
            field: "name",
            existing: existing.name.clone(),
            incoming: incoming.name.clone(),
        });
    }
    if existing.checksum != incoming.checksum {
        diag.warn(Warning::FontRedefinitionMismatch {
            number,
            field: "checksum",
            existing: existing.checksum.to_string(),
            incoming: incoming.checksum.to_string(),
        });
    }
}
