//! Helvetica text metrics.
//!
//! Caption centering and hyperlink extents are computed from measured text
//! widths, not estimated ones, so the advance widths of the standard
//! Helvetica font are carried here. Widths are in 1/1000 of the font size,
//! indexed by ASCII code point 32..=126.

const FIRST_CHAR: usize = 32;

/// Advance widths for Helvetica, glyphs 32 (space) through 126 (tilde).
const HELVETICA_WIDTHS: [u32; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, // space ! " # $ % & '
    333, 333, 389, 584, 278, 333, 278, 278, // ( ) * + , - . /
    556, 556, 556, 556, 556, 556, 556, 556, // 0 1 2 3 4 5 6 7
    556, 556, 278, 278, 584, 584, 584, 556, // 8 9 : ; < = > ?
    1015, 667, 667, 722, 722, 667, 611, 778, // @ A B C D E F G
    722, 278, 500, 667, 556, 833, 722, 778, // H I J K L M N O
    667, 778, 722, 667, 611, 722, 667, 944, // P Q R S T U V W
    667, 667, 611, 278, 278, 278, 469, 556, // X Y Z [ \ ] ^ _
    333, 556, 556, 500, 556, 556, 278, 556, // ` a b c d e f g
    556, 222, 222, 500, 222, 833, 556, 556, // h i j k l m n o
    556, 556, 333, 500, 278, 556, 500, 722, // p q r s t u v w
    500, 500, 500, 334, 260, 334, 584, // x y z { | } ~
];

/// Advance width of one character in 1/1000 units.
///
/// Characters outside the table fall back to the space width; the caption
/// and band strings are plain ASCII so this path never fires in practice.
fn char_width(c: char) -> u32 {
    let code = c as usize;
    if (FIRST_CHAR..FIRST_CHAR + HELVETICA_WIDTHS.len()).contains(&code) {
        HELVETICA_WIDTHS[code - FIRST_CHAR]
    } else {
        HELVETICA_WIDTHS[0]
    }
}

/// Measured width of `text` rendered in Helvetica at `font_size` points.
pub fn text_width(text: &str, font_size: f64) -> f64 {
    let units: u32 = text.chars().map(char_width).sum();
    units as f64 * font_size / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_width_matches_afm() {
        // 278/1000 * 10pt
        assert!((text_width(" ", 10.0) - 2.78).abs() < 1e-9);
    }

    #[test]
    fn width_scales_linearly_with_font_size() {
        let at_eight = text_width("True Copy", 8.0);
        let at_sixteen = text_width("True Copy", 16.0);
        assert!((at_sixteen - 2.0 * at_eight).abs() < 1e-9);
    }

    #[test]
    fn width_is_additive_over_substrings() {
        let whole = text_width("Proofed @ example.org", 8.0);
        let parts = text_width("Proofed @ ", 8.0) + text_width("example.org", 8.0);
        assert!((whole - parts).abs() < 1e-9);
    }

    #[test]
    fn wide_glyphs_measure_wider() {
        assert!(text_width("W", 10.0) > text_width("i", 10.0));
    }

    #[test]
    fn empty_text_has_zero_width() {
        assert_eq!(text_width("", 12.0), 0.0);
    }
}
