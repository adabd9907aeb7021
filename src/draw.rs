//! # Image Overlays
//!
//! In-place drawing on YUV 4:2:0 frame buffers: bitmap text with integer
//! scaling, motion boxes and crosses in inverted grey or chroma red, and the
//! mask/label visualisations used by setup mode and the motion stream.
//! Nothing here allocates; everything draws through a mutable borrow of the
//! frame.
//!
//! The font is a 7x8 cell per glyph with three levels: transparent, black
//! outline and white core. Glyph art below defines only the white core; the
//! black outline is derived at startup by dilating the core by one pixel,
//! which keeps the table readable and the contrast behaviour uniform.
//! Lowercase input is folded onto the uppercase glyphs.

use crate::image::Location;
use once_cell::sync::Lazy;

pub const CHAR_WIDTH: usize = 7;
pub const CHAR_HEIGHT: usize = 8;

/// Literal two-character newline sequence accepted in overlay text.
pub const NEWLINE: &str = "\\n";

/// Box/cross rendering styles for the locate overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocateStyle {
    #[default]
    Box,
    RedBox,
    Cross,
    RedCross,
}

/// When the locate overlay is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocateMode {
    #[default]
    Off,
    /// Draw on the output frames as they are captured.
    On,
    /// Draw only on the event preview image.
    Preview,
}

type Glyph = [[u8; CHAR_WIDTH]; CHAR_HEIGHT];

struct GlyphDef(u8, [&'static str; CHAR_HEIGHT]);

#[rustfmt::skip]
static GLYPH_ART: &[GlyphDef] = &[
    GlyphDef(b' ', ["       ", "       ", "       ", "       ", "       ", "       ", "       ", "       "]),
    GlyphDef(b'0', ["  ###  ", " #   # ", " #  ## ", " # # # ", " ##  # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'1', ["   #   ", "  ##   ", "   #   ", "   #   ", "   #   ", "   #   ", "  ###  ", "       "]),
    GlyphDef(b'2', ["  ###  ", " #   # ", "     # ", "    #  ", "   #   ", "  #    ", " ##### ", "       "]),
    GlyphDef(b'3', ["  ###  ", " #   # ", "     # ", "   ##  ", "     # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'4', ["    #  ", "   ##  ", "  # #  ", " #  #  ", " ##### ", "    #  ", "    #  ", "       "]),
    GlyphDef(b'5', [" ##### ", " #     ", " ####  ", "     # ", "     # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'6', ["  ###  ", " #     ", " ####  ", " #   # ", " #   # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'7', [" ##### ", "     # ", "    #  ", "   #   ", "   #   ", "   #   ", "   #   ", "       "]),
    GlyphDef(b'8', ["  ###  ", " #   # ", " #   # ", "  ###  ", " #   # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'9', ["  ###  ", " #   # ", " #   # ", "  #### ", "     # ", "     # ", "  ###  ", "       "]),
    GlyphDef(b'A', ["  ###  ", " #   # ", " #   # ", " ##### ", " #   # ", " #   # ", " #   # ", "       "]),
    GlyphDef(b'B', [" ####  ", " #   # ", " #   # ", " ####  ", " #   # ", " #   # ", " ####  ", "       "]),
    GlyphDef(b'C', ["  ###  ", " #   # ", " #     ", " #     ", " #     ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'D', [" ####  ", " #   # ", " #   # ", " #   # ", " #   # ", " #   # ", " ####  ", "       "]),
    GlyphDef(b'E', [" ##### ", " #     ", " #     ", " ####  ", " #     ", " #     ", " ##### ", "       "]),
    GlyphDef(b'F', [" ##### ", " #     ", " #     ", " ####  ", " #     ", " #     ", " #     ", "       "]),
    GlyphDef(b'G', ["  ###  ", " #   # ", " #     ", " #  ## ", " #   # ", " #   # ", "  #### ", "       "]),
    GlyphDef(b'H', [" #   # ", " #   # ", " #   # ", " ##### ", " #   # ", " #   # ", " #   # ", "       "]),
    GlyphDef(b'I', ["  ###  ", "   #   ", "   #   ", "   #   ", "   #   ", "   #   ", "  ###  ", "       "]),
    GlyphDef(b'J', ["   ### ", "    #  ", "    #  ", "    #  ", "    #  ", " #  #  ", "  ##   ", "       "]),
    GlyphDef(b'K', [" #   # ", " #  #  ", " # #   ", " ##    ", " # #   ", " #  #  ", " #   # ", "       "]),
    GlyphDef(b'L', [" #     ", " #     ", " #     ", " #     ", " #     ", " #     ", " ##### ", "       "]),
    GlyphDef(b'M', [" #   # ", " ## ## ", " # # # ", " # # # ", " #   # ", " #   # ", " #   # ", "       "]),
    GlyphDef(b'N', [" #   # ", " ##  # ", " # # # ", " #  ## ", " #   # ", " #   # ", " #   # ", "       "]),
    GlyphDef(b'O', ["  ###  ", " #   # ", " #   # ", " #   # ", " #   # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'P', [" ####  ", " #   # ", " #   # ", " ####  ", " #     ", " #     ", " #     ", "       "]),
    GlyphDef(b'Q', ["  ###  ", " #   # ", " #   # ", " #   # ", " # # # ", " #  #  ", "  ## # ", "       "]),
    GlyphDef(b'R', [" ####  ", " #   # ", " #   # ", " ####  ", " # #   ", " #  #  ", " #   # ", "       "]),
    GlyphDef(b'S', ["  #### ", " #     ", " #     ", "  ###  ", "     # ", "     # ", " ####  ", "       "]),
    GlyphDef(b'T', [" ##### ", "   #   ", "   #   ", "   #   ", "   #   ", "   #   ", "   #   ", "       "]),
    GlyphDef(b'U', [" #   # ", " #   # ", " #   # ", " #   # ", " #   # ", " #   # ", "  ###  ", "       "]),
    GlyphDef(b'V', [" #   # ", " #   # ", " #   # ", " #   # ", " #   # ", "  # #  ", "   #   ", "       "]),
    GlyphDef(b'W', [" #   # ", " #   # ", " #   # ", " # # # ", " # # # ", " # # # ", "  # #  ", "       "]),
    GlyphDef(b'X', [" #   # ", " #   # ", "  # #  ", "   #   ", "  # #  ", " #   # ", " #   # ", "       "]),
    GlyphDef(b'Y', [" #   # ", " #   # ", "  # #  ", "   #   ", "   #   ", "   #   ", "   #   ", "       "]),
    GlyphDef(b'Z', [" ##### ", "     # ", "    #  ", "   #   ", "  #    ", " #     ", " ##### ", "       "]),
    GlyphDef(b':', ["       ", "   #   ", "       ", "       ", "       ", "   #   ", "       ", "       "]),
    GlyphDef(b';', ["       ", "   #   ", "       ", "       ", "   #   ", "  #    ", "       ", "       "]),
    GlyphDef(b'.', ["       ", "       ", "       ", "       ", "       ", "  ##   ", "  ##   ", "       "]),
    GlyphDef(b',', ["       ", "       ", "       ", "       ", "  ##   ", "   #   ", "  #    ", "       "]),
    GlyphDef(b'-', ["       ", "       ", "       ", " ##### ", "       ", "       ", "       ", "       "]),
    GlyphDef(b'+', ["       ", "   #   ", "   #   ", " ##### ", "   #   ", "   #   ", "       ", "       "]),
    GlyphDef(b'_', ["       ", "       ", "       ", "       ", "       ", "       ", " ##### ", "       "]),
    GlyphDef(b'/', ["     # ", "     # ", "    #  ", "   #   ", "  #    ", " #     ", " #     ", "       "]),
    GlyphDef(b'\\', [" #     ", " #     ", "  #    ", "   #   ", "    #  ", "     # ", "     # ", "       "]),
    GlyphDef(b'%', [" ##  # ", " ## #  ", "   #   ", "   #   ", "  #    ", " # ##  ", "#  ##  ", "       "]),
    GlyphDef(b'(', ["    #  ", "   #   ", "  #    ", "  #    ", "  #    ", "   #   ", "    #  ", "       "]),
    GlyphDef(b')', ["  #    ", "   #   ", "    #  ", "    #  ", "    #  ", "   #   ", "  #    ", "       "]),
    GlyphDef(b'[', ["  ###  ", "  #    ", "  #    ", "  #    ", "  #    ", "  #    ", "  ###  ", "       "]),
    GlyphDef(b']', ["  ###  ", "    #  ", "    #  ", "    #  ", "    #  ", "    #  ", "  ###  ", "       "]),
    GlyphDef(b'!', ["   #   ", "   #   ", "   #   ", "   #   ", "   #   ", "       ", "   #   ", "       "]),
    GlyphDef(b'?', ["  ###  ", " #   # ", "     # ", "    #  ", "   #   ", "       ", "   #   ", "       "]),
    GlyphDef(b'\'', ["   #   ", "   #   ", "  #    ", "       ", "       ", "       ", "       ", "       "]),
    GlyphDef(b'"', ["  # #  ", "  # #  ", "       ", "       ", "       ", "       ", "       ", "       "]),
    GlyphDef(b'*', ["       ", " #   # ", "  # #  ", " ##### ", "  # #  ", " #   # ", "       ", "       "]),
    GlyphDef(b'=', ["       ", "       ", " ##### ", "       ", " ##### ", "       ", "       ", "       "]),
    GlyphDef(b'<', ["     # ", "    #  ", "   #   ", "  #    ", "   #   ", "    #  ", "     # ", "       "]),
    GlyphDef(b'>', [" #     ", "  #    ", "   #   ", "    #  ", "   #   ", "  #    ", " #     ", "       "]),
    GlyphDef(b'#', ["  # #  ", " ##### ", "  # #  ", "  # #  ", "  # #  ", " ##### ", "  # #  ", "       "]),
];

fn render_glyph(art: &[&'static str; CHAR_HEIGHT]) -> Glyph {
    let mut g: Glyph = [[0; CHAR_WIDTH]; CHAR_HEIGHT];
    for (y, row) in art.iter().enumerate() {
        for (x, b) in row.bytes().enumerate().take(CHAR_WIDTH) {
            if b == b'#' {
                g[y][x] = 2;
            }
        }
    }
    // Derive the black outline: any transparent cell touching the core.
    let core = g;
    for y in 0..CHAR_HEIGHT {
        for x in 0..CHAR_WIDTH {
            if core[y][x] != 0 {
                continue;
            }
            'scan: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let (ny, nx) = (y as i32 + dy, x as i32 + dx);
                    if ny >= 0
                        && ny < CHAR_HEIGHT as i32
                        && nx >= 0
                        && nx < CHAR_WIDTH as i32
                        && core[ny as usize][nx as usize] == 2
                    {
                        g[y][x] = 1;
                        break 'scan;
                    }
                }
            }
        }
    }
    g
}

/// Glyph lookup for 7-bit ASCII; unknown codes render as space, lowercase
/// folds onto the uppercase glyphs.
static GLYPHS: Lazy<[Glyph; 128]> = Lazy::new(|| {
    let blank: Glyph = [[0; CHAR_WIDTH]; CHAR_HEIGHT];
    let mut table = [blank; 128];
    for def in GLYPH_ART {
        table[def.0 as usize] = render_glyph(&def.1);
    }
    for c in b'a'..=b'z' {
        table[c as usize] = table[(c - b'a' + b'A') as usize];
    }
    table
});

/// Draw one line of text. `startx` right of the frame centre anchors the
/// text right-aligned; text running past the frame edge is truncated.
fn draw_textn(
    image: &mut [u8],
    width: usize,
    height: usize,
    startx: usize,
    starty: usize,
    text: &str,
    factor: usize,
) {
    let mut len = text.len();
    let mut startx = startx as i64;

    if startx > width as i64 / 2 {
        startx -= (len * 6 * factor) as i64;
    }
    if startx + (len * 6 * factor) as i64 >= width as i64 {
        len = ((width as i64 - startx - 1) / (6 * factor) as i64).max(0) as usize;
    }
    if startx < 1 || starty < 1 || len < 1 {
        return;
    }
    let startx = startx as usize;

    for (pos, &byte) in text.as_bytes().iter().enumerate().take(len) {
        let glyph = &GLYPHS[(byte & 0x7f) as usize];
        let origin_x = startx + pos * 6 * factor;

        for y in 0..CHAR_HEIGHT * factor {
            let row = starty + y;
            if row >= height {
                return;
            }
            for x in 0..CHAR_WIDTH * factor {
                let col = origin_x + x;
                if col >= width {
                    break;
                }
                match glyph[y / factor][x / factor] {
                    1 => image[row * width + col] = 0,
                    2 => image[row * width + col] = 255,
                    _ => {}
                }
            }
        }
    }
}

/// Draw text on the Y plane with `\n` (as the literal two-character
/// sequence) starting new lines that scroll up from `starty`. The scale
/// factor shrinks automatically when a line would not fit the frame.
pub fn draw_text(
    image: &mut [u8],
    width: usize,
    height: usize,
    startx: usize,
    starty: usize,
    text: &str,
    factor: usize,
) {
    let mut factor = factor.max(1);

    let num_nl = text.matches(NEWLINE).count();
    let longest = text.split(NEWLINE).map(str::len).max().unwrap_or(0);

    if longest * CHAR_WIDTH * factor > width {
        factor = (width / (longest.max(1) * CHAR_WIDTH)).max(1);
    }
    if (num_nl + 1) * CHAR_HEIGHT * factor > height {
        factor = (height / ((num_nl + 1) * CHAR_HEIGHT)).max(1);
    }

    let line_space = factor * 9;
    let mut y = starty as i64 - (line_space * num_nl) as i64;

    for line in text.split(NEWLINE) {
        if y >= 1 {
            draw_textn(image, width, height, startx, y as usize, line, factor);
        }
        y += line_space as i64;
    }
}

/// Largest text scale that keeps two 10-pixel text sections within a
/// quarter of the frame.
pub fn validate_text_scale(requested: i32, width: usize, height: usize) -> i32 {
    let mut scale = requested.max(1) as usize;
    if scale * 10 * 2 > width / 4 {
        scale = (width / (4 * 10 * 2)).max(1);
    }
    if scale * 10 * 2 > height / 4 {
        scale = (height / (4 * 10 * 2)).max(1);
    }
    scale as i32
}

fn invert_box(image: &mut [u8], width: usize, loc: &Location) {
    let (minx, maxx) = (loc.minx as usize, loc.maxx as usize);
    let (miny, maxy) = (loc.miny as usize, loc.maxy as usize);

    for x in minx..=maxx {
        image[miny * width + x] = !image[miny * width + x];
        image[maxy * width + x] = !image[maxy * width + x];
    }
    for y in miny..=maxy {
        image[y * width + minx] = !image[y * width + minx];
        image[y * width + maxx] = !image[y * width + maxx];
    }
}

fn invert_cross(image: &mut [u8], width: usize, height: usize, loc: &Location) {
    let cx = loc.x.clamp(10, width as i32 - 11) as usize;
    let cy = loc.y.clamp(10, height as i32 - 11) as usize;

    for x in cx - 10..=cx + 10 {
        image[cy * width + x] = !image[cy * width + x];
    }
    for y in cy - 10..=cy + 10 {
        image[y * width + cx] = !image[y * width + cx];
    }
}

/// Draw the locate box or cross by inverting Y pixels. Inversion makes a
/// second identical draw cancel the first. When `also_motion` is set, the
/// motion/debug image receives a plain box as well.
pub fn draw_location(
    loc: &Location,
    width: usize,
    height: usize,
    image: &mut [u8],
    motion: Option<&mut [u8]>,
    style: LocateStyle,
) {
    let also_cross = matches!(style, LocateStyle::Cross | LocateStyle::RedCross);
    if let Some(motion) = motion {
        // Debug image always gets a plain box or cross.
        if also_cross {
            invert_cross(motion, width, height, loc);
        } else {
            invert_box(motion, width, loc);
        }
    }
    match style {
        LocateStyle::Box => invert_box(image, width, loc),
        LocateStyle::Cross => invert_cross(image, width, height, loc),
        // Red variants are drawn by draw_red_location.
        LocateStyle::RedBox | LocateStyle::RedCross => {}
    }
}

/// Draw the locate box or cross in chroma red (grey Y, U = 128, V = 255).
/// Unlike the inverting variants this is an absolute write and is not
/// self-cancelling.
pub fn draw_red_location(
    loc: &Location,
    width: usize,
    height: usize,
    image: &mut [u8],
    motion: Option<&mut [u8]>,
    style: LocateStyle,
) {
    let motionsize = width * height;
    let cwidth = width / 2;

    if let Some(motion) = motion {
        if matches!(style, LocateStyle::RedCross) {
            invert_cross(motion, width, height, loc);
        } else {
            invert_box(motion, width, loc);
        }
    }

    let (u_base, v_base) = (motionsize, motionsize + motionsize / 4);

    match style {
        LocateStyle::RedBox => {
            let (minx, maxx) = (loc.minx as usize, loc.maxx as usize);
            let (miny, maxy) = (loc.miny as usize, loc.maxy as usize);
            if maxx < minx + 4 || maxy < miny + 2 {
                return;
            }

            for x in ((minx + 2)..=(maxx - 2)).step_by(2) {
                for y in [miny, maxy] {
                    let cidx = x / 2 + cwidth * (y / 2);
                    image[u_base + cidx] = 128;
                    image[v_base + cidx] = 255;

                    // 2x2 grey block on the luma plane per chroma sample.
                    let yidx = y * width + x;
                    image[yidx] = 128;
                    image[yidx + 1] = 128;
                    if y + 1 < height {
                        image[yidx + width] = 128;
                        image[yidx + width + 1] = 128;
                    }
                }
            }
            for y in (miny..=maxy).step_by(2) {
                for x in [minx, maxx] {
                    let cidx = x / 2 + (y / 2) * cwidth;
                    image[u_base + cidx] = 128;
                    image[v_base + cidx] = 255;

                    let yidx = y * width + x;
                    image[yidx] = 128;
                    if y + 1 < height {
                        image[yidx + width] = 128;
                    }
                    if x + 1 < width {
                        image[yidx + 1] = 128;
                        if y + 1 < height {
                            image[yidx + width + 1] = 128;
                        }
                    }
                }
            }
        }
        LocateStyle::RedCross => {
            let cx = loc.x.clamp(10, width as i32 - 11) as usize;
            let cy = loc.y.clamp(10, height as i32 - 11) as usize;

            for x in ((cx - 10)..=(cx + 10)).step_by(2) {
                let cidx = x / 2 + cwidth * (cy / 2);
                image[u_base + cidx] = 128;
                image[v_base + cidx] = 255;
            }
            for y in ((cy - 10)..=(cy + 10)).step_by(2) {
                let cidx = cx / 2 + (y / 2) * cwidth;
                image[u_base + cidx] = 128;
                image[v_base + cidx] = 255;
            }
        }
        _ => {}
    }
}

/// Paint the smart mask red on a motion image.
pub fn overlay_smartmask(smartmask_final: &[u8], out: &mut [u8], width: usize, height: usize) {
    overlay_chroma(smartmask_final, out, width, height, 128, 255, |m| m == 0);
    let motionsize = width * height;
    for i in 0..motionsize {
        if smartmask_final[i] == 0 {
            out[i] = 0;
        }
    }
}

/// Paint the fixed mask green on a motion image.
pub fn overlay_fixed_mask(mask: &[u8], out: &mut [u8], width: usize, height: usize) {
    overlay_chroma(mask, out, width, height, 0, 0, |m| m == 0);
    let motionsize = width * height;
    for i in 0..motionsize {
        if mask[i] == 0 {
            out[i] = 0;
        }
    }
}

/// Paint the significant label groups blue on a motion image.
pub fn overlay_largest_label(labels: &[i32], out: &mut [u8], width: usize, height: usize) {
    let motionsize = width * height;
    let (u_base, v_base) = (motionsize, motionsize + motionsize / 4);
    let significant = |idx: usize| labels[idx] & crate::alg::label::ABOVE_THRESHOLD_BIT != 0;

    let mut c = 0;
    for y in (0..height).step_by(2) {
        let line = y * width;
        for x in (0..width).step_by(2) {
            if significant(line + x)
                || significant(line + x + 1)
                || significant(line + width + x)
                || significant(line + width + x + 1)
            {
                out[u_base + c] = 255;
                out[v_base + c] = 128;
            }
            c += 1;
        }
    }
    for i in 0..motionsize {
        if significant(i) {
            out[i] = 0;
        }
    }
}

fn overlay_chroma(
    mask: &[u8],
    out: &mut [u8],
    width: usize,
    height: usize,
    u: u8,
    v: u8,
    masked: impl Fn(u8) -> bool,
) {
    let motionsize = width * height;
    let (u_base, v_base) = (motionsize, motionsize + motionsize / 4);

    let mut c = 0;
    for y in (0..height).step_by(2) {
        let line = y * width;
        for x in (0..width).step_by(2) {
            if masked(mask[line + x])
                || masked(mask[line + x + 1])
                || masked(mask[line + width + x])
                || masked(mask[line + width + x + 1])
            {
                out[u_base + c] = u;
                out[v_base + c] = v;
            }
            c += 1;
        }
    }
}
