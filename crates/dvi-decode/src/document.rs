//! The structured document assembled during translation.
//!
//! Everything in this module is plain data. Coordinates are integer pixels
//! with the origin at the top-left corner of the page, the horizontal axis
//! growing to the right and the vertical axis growing downward. Rules and
//! images are anchored at their top-left corner, unlike the DVI commands
//! they come from, which anchor at the bottom-left.

use serde::{Deserialize, Serialize};

/// Decoded contents of a DVI file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The fonts referenced by the pages.
    ///
    /// After consolidation each logical font (by name) appears exactly once
    /// and `number` equals the font's position in this vector.
    pub fonts: Vec<Font>,
    /// The pages, in the order they appear in the DVI byte stream.
    pub pages: Vec<Page>,
}

/// One font of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Font {
    /// Number used by [`PageFont`] values to refer to this font.
    pub number: i32,
    /// The external name of the font, e.g. `lmroman10-regular.otf`.
    pub name: String,
    /// The directory part of the name in the font definition, if any.
    pub path: String,
    /// The feature substring of the name in the font definition, if any.
    pub features: String,
}

/// One page of the document.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Fonts used on this page, in order of first use.
    pub fonts: Vec<PageFont>,
    /// Typeset rules, in stream order.
    pub rules: Vec<Rule>,
    /// Embedded images, in stream order.
    pub images: Vec<Image>,
}

/// The glyphs of one font on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFont {
    /// Reference into [`Document::fonts`].
    ///
    /// While a page is being translated this is the DVI font number; the
    /// consolidation pass rewrites it.
    pub number: i32,
    /// The glyphs placed with this font.
    pub glyphs: Vec<Glyph>,
}

/// All placements of one glyph of one font on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glyph {
    /// Index of the glyph in the external font.
    pub index: u32,
    /// Placements grouped by pixel size.
    pub sizes: Vec<GlyphSize>,
}

/// Placements of a glyph at one pixel size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphSize {
    /// The scaled pixel size of the font the glyph was set with.
    pub size: i32,
    /// Where the glyph goes, in stream order.
    pub placements: Vec<Placement>,
}

/// Pixel position of one glyph placement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: i32,
    pub y: i32,
}

/// A solid rectangle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A placed PostScript image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// File name from the special, without the surrounding quotes.
    pub file_name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Page {
    /// Record a glyph placement, creating the page font, glyph, and size
    /// entries on first use.
    pub(crate) fn place(&mut self, font_number: i32, glyph_index: u32, size: i32, x: i32, y: i32) {
        let f = match self.fonts.iter().position(|f| f.number == font_number) {
            Some(i) => i,
            None => {
                self.fonts.push(PageFont {
                    number: font_number,
                    glyphs: vec![],
                });
                self.fonts.len() - 1
            }
        };
        let font = &mut self.fonts[f];
        let g = match font.glyphs.iter().position(|g| g.index == glyph_index) {
            Some(i) => i,
            None => {
                font.glyphs.push(Glyph {
                    index: glyph_index,
                    sizes: vec![],
                });
                font.glyphs.len() - 1
            }
        };
        let glyph = &mut font.glyphs[g];
        let s = match glyph.sizes.iter().position(|s| s.size == size) {
            Some(i) => i,
            None => {
                glyph.sizes.push(GlyphSize {
                    size,
                    placements: vec![],
                });
                glyph.sizes.len() - 1
            }
        };
        glyph.sizes[s].placements.push(Placement { x, y });
    }
}

impl Document {
    /// Merge fonts that share an external name and renumber all references.
    ///
    /// Multiple DVI font numbers may denote the same external font at
    /// different scales. The scale is irrelevant once glyphs have been
    /// emitted, because each [`GlyphSize`] already records it, so the fonts
    /// can be merged. After this pass each name appears once in
    /// [`Document::fonts`], page fonts are sorted by number, glyphs are
    /// sorted by index, and duplicate glyph and size entries have been
    /// merged. Placements are neither deduplicated nor reordered.
    ///
    /// Running the pass a second time is a no-op.
    pub fn consolidate(&mut self) {
        let mut renumber = Vec::new();
        let mut fonts: Vec<Font> = Vec::new();
        for font in &self.fonts {
            let new = match fonts.iter().position(|f| f.name == font.name) {
                Some(i) => i as i32,
                None => {
                    fonts.push(Font {
                        number: fonts.len() as i32,
                        name: font.name.clone(),
                        path: font.path.clone(),
                        features: font.features.clone(),
                    });
                    fonts.len() as i32 - 1
                }
            };
            renumber.push((font.number, new));
        }
        self.fonts = fonts;

        for page in &mut self.pages {
            let mut merged: Vec<PageFont> = Vec::new();
            for mut page_font in page.fonts.drain(..) {
                if let Some(&(_, new)) = renumber.iter().find(|(old, _)| *old == page_font.number) {
                    page_font.number = new;
                }
                match merged.iter_mut().find(|f| f.number == page_font.number) {
                    Some(existing) => existing.glyphs.append(&mut page_font.glyphs),
                    None => merged.push(page_font),
                }
            }
            merged.sort_by_key(|f| f.number);
            for page_font in &mut merged {
                page_font.glyphs = merge_glyphs(std::mem::take(&mut page_font.glyphs));
            }
            page.fonts = merged;
        }
    }
}

fn merge_glyphs(glyphs: Vec<Glyph>) -> Vec<Glyph> {
    let mut merged: Vec<Glyph> = Vec::new();
    for glyph in glyphs {
        match merged.iter_mut().find(|g| g.index == glyph.index) {
            Some(existing) => {
                for size in glyph.sizes {
                    match existing.sizes.iter_mut().find(|s| s.size == size.size) {
                        Some(s) => s.placements.extend(size.placements),
                        None => existing.sizes.push(size),
                    }
                }
            }
            None => merged.push(glyph),
        }
    }
    merged.sort_by_key(|g| g.index);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placements(xs: &[i32]) -> Vec<Placement> {
        xs.iter().map(|&x| Placement { x, y: 0 }).collect()
    }

    #[test]
    fn place_groups_by_font_glyph_and_size() {
        let mut page = Page::default();
        page.place(7, 3, 12, 10, 20);
        page.place(7, 3, 12, 30, 40);
        page.place(7, 3, 10, 50, 60);
        page.place(7, 4, 12, 70, 80);
        page.place(8, 3, 12, 90, 100);

        assert_eq!(page.fonts.len(), 2);
        let first = &page.fonts[0];
        assert_eq!(first.number, 7);
        assert_eq!(first.glyphs.len(), 2);
        assert_eq!(first.glyphs[0].index, 3);
        assert_eq!(first.glyphs[0].sizes.len(), 2);
        assert_eq!(
            first.glyphs[0].sizes[0].placements,
            vec![Placement { x: 10, y: 20 }, Placement { x: 30, y: 40 }],
        );
    }

    #[test]
    fn consolidate_merges_fonts_with_the_same_name() {
        let font = |number: i32, name: &str| Font {
            number,
            name: name.into(),
            path: "".into(),
            features: "".into(),
        };
        let mut document = Document {
            fonts: vec![font(21, "a.otf"), font(9, "b.otf"), font(4, "a.otf")],
            pages: vec![Page {
                fonts: vec![
                    PageFont {
                        number: 4,
                        glyphs: vec![Glyph {
                            index: 2,
                            sizes: vec![GlyphSize {
                                size: 12,
                                placements: placements(&[5]),
                            }],
                        }],
                    },
                    PageFont {
                        number: 9,
                        glyphs: vec![],
                    },
                    PageFont {
                        number: 21,
                        glyphs: vec![Glyph {
                            index: 2,
                            sizes: vec![GlyphSize {
                                size: 12,
                                placements: placements(&[1]),
                            }],
                        }],
                    },
                ],
                rules: vec![],
                images: vec![],
            }],
        };

        document.consolidate();

        assert_eq!(document.fonts.len(), 2);
        assert_eq!(document.fonts[0].number, 0);
        assert_eq!(document.fonts[0].name, "a.otf");
        assert_eq!(document.fonts[1].number, 1);
        assert_eq!(document.fonts[1].name, "b.otf");

        let page = &document.pages[0];
        assert_eq!(page.fonts.len(), 2);
        assert_eq!(page.fonts[0].number, 0);
        // Both placements of glyph 2 at size 12 end up in one entry, in
        // stream order: the page font with old number 4 came first.
        assert_eq!(page.fonts[0].glyphs.len(), 1);
        assert_eq!(page.fonts[0].glyphs[0].sizes.len(), 1);
        assert_eq!(
            page.fonts[0].glyphs[0].sizes[0].placements,
            placements(&[5, 1]),
        );

        let again = document.clone();
        document.consolidate();
        assert_eq!(document, again);
    }
}
