use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use dvi_decode::{
    decode, Document, FontAsset, FontProvider, GlyphTable, Settings, WriteDiagnostics,
};
use skrifa::font::FontRef;
use skrifa::instance::{LocationRef, Size};
use skrifa::{GlyphId, MetadataProvider};

fn main() {
    if let Err(err) = Cli::parse().run() {
        if !err.is_empty() {
            eprintln!("{}: {err}", "Error".bright_red());
        }
        std::process::exit(1);
    }
}

/// Decode DVI files produced by Lua-enabled TeX engines.
#[derive(Debug, clap::Parser)]
#[command(
    name = "dvidecode",
    author = "The Texcraft Project",
    version = "0.1",
    about,
    max_term_width(100)
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn run(self) -> Result<(), String> {
        match self.command {
            Command::Decode(decode) => decode.run(),
            Command::Inspect(inspect) => inspect.run(),
        }
    }
}

#[derive(Clone, Debug, clap::Subcommand)]
enum Command {
    /// Decode a DVI file and print the document as JSON.
    Decode(Decode),
    /// Print a one-line summary of each page of a DVI file.
    Inspect(Inspect),
}

#[derive(Clone, Debug, clap::Args)]
struct Input {
    /// Path to the DVI file.
    path: PathBuf,

    /// Resolution of the target display, in pixels per inch.
    #[arg(long, default_value_t = 96.0)]
    dpi: f64,

    /// Override the magnification recorded in the file, in thousandths.
    #[arg(long, default_value_t = 0)]
    magnification: i32,

    /// Where to find the font file for a font name, e.g.
    /// `lmroman10-regular.otf=/usr/share/fonts/lm`. May be repeated.
    /// Fonts not listed here are looked up in the directory their
    /// definition names.
    #[arg(long = "font-dir", value_name = "NAME=DIR")]
    font_dirs: Vec<String>,

    /// Directory holding the per-font glyph-description tables: one JSON
    /// file per font, named after the lowercased font basename.
    #[arg(long, value_name = "DIR")]
    glyph_tables: Option<PathBuf>,

    /// Trace every command to standard error.
    #[arg(long)]
    debug: bool,
}

impl Input {
    fn decode(&self) -> Result<Document, String> {
        let dvi = match std::fs::read(&self.path) {
            Ok(dvi) => dvi,
            Err(err) => return Err(format!("failed to read `{}`: {}", self.path.display(), err)),
        };
        let mut font_dirs = HashMap::new();
        for mapping in &self.font_dirs {
            match mapping.split_once('=') {
                Some((name, dir)) => {
                    font_dirs.insert(name.to_string(), PathBuf::from(dir));
                }
                None => return Err(format!("invalid font mapping `{mapping}`; use NAME=DIR")),
            }
        }
        let provider = DirectoryProvider {
            font_dirs,
            glyph_tables: self.glyph_tables.clone(),
        };
        let settings = Settings {
            display_dpi: self.dpi,
            magnification: self.magnification,
            debug: self.debug,
        };
        let mut sink = WriteDiagnostics(std::io::stderr());
        let (result, _) = decode(&dvi, &settings, &provider, &mut sink);
        // The fatal error, like the warnings, has already been written to
        // standard error by the sink.
        result.map_err(|_| String::new())
    }
}

#[derive(Clone, Debug, Parser)]
struct Decode {
    #[command(flatten)]
    input: Input,

    /// Write the JSON document here instead of standard out.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Decode {
    fn run(self) -> Result<(), String> {
        let document = self.input.decode()?;
        let json = serde_json::to_string_pretty(&document)
            .expect("the document contains nothing unserializable");
        match self.output {
            None => println!("{json}"),
            Some(path) => std::fs::write(&path, json)
                .map_err(|err| format!("failed to write `{}`: {}", path.display(), err))?,
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Parser)]
struct Inspect {
    #[command(flatten)]
    input: Input,
}

impl Inspect {
    fn run(self) -> Result<(), String> {
        let document = self.input.decode()?;
        println!("{} fonts", document.fonts.len());
        for font in &document.fonts {
            println!("  [{}] {}", font.number, font.name);
        }
        for (i, page) in document.pages.iter().enumerate() {
            let glyphs: usize = page
                .fonts
                .iter()
                .flat_map(|font| &font.glyphs)
                .flat_map(|glyph| &glyph.sizes)
                .map(|size| size.placements.len())
                .sum();
            println!(
                "page {}: {} glyphs, {} rules, {} images",
                i + 1,
                glyphs,
                page.rules.len(),
                page.images.len(),
            );
        }
        Ok(())
    }
}

/// Loads fonts from the file system, parsing them with skrifa.
struct DirectoryProvider {
    font_dirs: HashMap<String, PathBuf>,
    glyph_tables: Option<PathBuf>,
}

impl FontProvider for DirectoryProvider {
    fn font_asset(&self, name: &str, dir: &str) -> Result<FontAsset, String> {
        let path = match self.font_dirs.get(name) {
            Some(mapped) => mapped.join(name),
            None if !dir.is_empty() => Path::new(dir).join(name),
            None => return Err(format!("no --font-dir mapping for `{name}`")),
        };
        let data = std::fs::read(&path)
            .map_err(|err| format!("failed to read `{}`: {}", path.display(), err))?;
        font_asset_from_bytes(&data)
    }

    fn glyph_table(&self, name: &str) -> Result<GlyphTable, String> {
        let Some(root) = &self.glyph_tables else {
            return Err(format!(
                "font `{name}` needs a glyph-description table but --glyph-tables was not given"
            ));
        };
        let basename = match name.rsplit_once('.') {
            Some((basename, _)) => basename,
            None => name,
        };
        let path = root.join(format!("{}.json", basename.to_lowercase()));
        let data = std::fs::read(&path)
            .map_err(|err| format!("failed to read `{}`: {}", path.display(), err))?;
        serde_json::from_slice(&data)
            .map_err(|err| format!("failed to parse `{}`: {}", path.display(), err))
    }
}

fn font_asset_from_bytes(data: &[u8]) -> Result<FontAsset, String> {
    let font = FontRef::new(data).map_err(|err| format!("not an OpenType font: {err}"))?;
    let metrics = font.metrics(Size::unscaled(), LocationRef::default());
    let glyph_metrics = font.glyph_metrics(Size::unscaled(), LocationRef::default());
    let advance_widths = (0..glyph_metrics.glyph_count())
        .map(|glyph| {
            glyph_metrics
                .advance_width(GlyphId::new(glyph as u16))
                .unwrap_or(0.0)
                .round() as u16
        })
        .collect();
    let glyph_index_map = font
        .charmap()
        .mappings()
        .map(|(code_point, glyph)| (code_point, glyph.to_u16() as u32))
        .collect();
    Ok(FontAsset {
        units_per_em: metrics.units_per_em,
        advance_widths,
        glyph_index_map,
    })
}
