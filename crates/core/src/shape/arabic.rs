//! Arabic contextual forms.
//!
//! Maps letters to their presentation form glyphs (isolated, final, initial,
//! medial) so that a renderer without an OpenType shaper still draws joined
//! script. Basic Arabic letters use Presentation Forms-B; the Persian and Urdu
//! additions use Presentation Forms-A. Works on logical order, before bidi
//! reordering.

/// Joining forms of one letter. Right-joining letters have no initial/medial.
struct Forms {
    isolated: char,
    final_: char,
    initial: Option<char>,
    medial: Option<char>,
}

/// Four consecutive forms starting at `base`.
const fn dual(base: u32) -> Forms {
    Forms {
        isolated: ch(base),
        final_: ch(base + 1),
        initial: Some(ch(base + 2)),
        medial: Some(ch(base + 3)),
    }
}

/// Isolated and final forms starting at `base`.
const fn right(base: u32) -> Forms {
    Forms {
        isolated: ch(base),
        final_: ch(base + 1),
        initial: None,
        medial: None,
    }
}

/// Code point to char, for the const tables.
const fn ch(code: u32) -> char {
    match char::from_u32(code) {
        Some(c) => c,
        None => '\u{fffd}',
    }
}

const TATWEEL: char = '\u{0640}';
const LAM: char = '\u{0644}';

/// Presentation forms of `c`, if it is a joining letter.
fn forms(c: char) -> Option<Forms> {
    let f = match c {
        '\u{0621}' => Forms {
            isolated: '\u{fe80}',
            final_: '\u{fe80}',
            initial: None,
            medial: None,
        },
        '\u{0622}' => right(0xfe81),
        '\u{0623}' => right(0xfe83),
        '\u{0624}' => right(0xfe85),
        '\u{0625}' => right(0xfe87),
        '\u{0626}' => dual(0xfe89),
        '\u{0627}' => right(0xfe8d),
        '\u{0628}' => dual(0xfe8f),
        '\u{0629}' => right(0xfe93),
        '\u{062a}' => dual(0xfe95),
        '\u{062b}' => dual(0xfe99),
        '\u{062c}' => dual(0xfe9d),
        '\u{062d}' => dual(0xfea1),
        '\u{062e}' => dual(0xfea5),
        '\u{062f}' => right(0xfea9),
        '\u{0630}' => right(0xfeab),
        '\u{0631}' => right(0xfead),
        '\u{0632}' => right(0xfeaf),
        '\u{0633}' => dual(0xfeb1),
        '\u{0634}' => dual(0xfeb5),
        '\u{0635}' => dual(0xfeb9),
        '\u{0636}' => dual(0xfebd),
        '\u{0637}' => dual(0xfec1),
        '\u{0638}' => dual(0xfec5),
        '\u{0639}' => dual(0xfec9),
        '\u{063a}' => dual(0xfecd),
        TATWEEL => Forms {
            isolated: TATWEEL,
            final_: TATWEEL,
            initial: Some(TATWEEL),
            medial: Some(TATWEEL),
        },
        '\u{0641}' => dual(0xfed1),
        '\u{0642}' => dual(0xfed5),
        '\u{0643}' => dual(0xfed9),
        LAM => dual(0xfedd),
        '\u{0645}' => dual(0xfee1),
        '\u{0646}' => dual(0xfee5),
        '\u{0647}' => dual(0xfee9),
        '\u{0648}' => right(0xfeed),
        '\u{0649}' => right(0xfeef),
        '\u{064a}' => dual(0xfef1),
        // Persian and Urdu letters
        '\u{0679}' => dual(0xfb66),
        '\u{067e}' => dual(0xfb56),
        '\u{0686}' => dual(0xfb7a),
        '\u{0688}' => right(0xfb88),
        '\u{0691}' => right(0xfb8c),
        '\u{0698}' => right(0xfb8a),
        '\u{06a9}' => dual(0xfb8e),
        '\u{06af}' => dual(0xfb92),
        '\u{06be}' => dual(0xfbaa),
        '\u{06c1}' => dual(0xfba6),
        '\u{06cc}' => dual(0xfbfc),
        '\u{06d2}' => right(0xfbae),
        _ => return None,
    };
    Some(f)
}

/// Lam-alef ligature (isolated, final) for the alef that follows a lam.
fn lam_alef(alef: char) -> Option<(char, char)> {
    match alef {
        '\u{0622}' => Some(('\u{fef5}', '\u{fef6}')),
        '\u{0623}' => Some(('\u{fef7}', '\u{fef8}')),
        '\u{0625}' => Some(('\u{fef9}', '\u{fefa}')),
        '\u{0627}' => Some(('\u{fefb}', '\u{fefc}')),
        _ => None,
    }
}

/// Marks that sit on a letter without interrupting joining.
pub(crate) fn is_transparent(c: char) -> bool {
    matches!(c,
        '\u{0591}'..='\u{05bd}' | '\u{05bf}' | '\u{05c1}'..='\u{05c2}' | '\u{05c4}'..='\u{05c5}' | '\u{05c7}'
        | '\u{0610}'..='\u{061a}' | '\u{064b}'..='\u{065f}' | '\u{0670}' | '\u{06d6}'..='\u{06dc}'
        | '\u{06df}'..='\u{06e4}' | '\u{06e7}'..='\u{06e8}' | '\u{06ea}'..='\u{06ed}'
        | '\u{200d}')
}

/// Whether `c` connects to the letter after it.
fn joins_forward(c: char) -> bool {
    forms(c).is_some_and(|f| f.initial.is_some())
}

/// Whether `c` connects to the letter before it.
fn joins_backward(c: char) -> bool {
    c != '\u{0621}' && forms(c).is_some()
}

/// True if any character needs contextual forms.
pub(crate) fn contains_arabic(text: &str) -> bool {
    text.chars().any(|c| forms(c).is_some())
}

/// Replace Arabic letters with their contextual presentation forms.
pub(crate) fn reshape(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let neighbour = |from: usize, forward: bool| -> Option<(usize, char)> {
        let mut i = from;
        loop {
            if forward {
                i += 1;
                if i >= chars.len() {
                    return None;
                }
            } else {
                if i == 0 {
                    return None;
                }
                i -= 1;
            }
            if !is_transparent(chars[i]) {
                return Some((i, chars[i]));
            }
        }
    };

    let mut out = String::with_capacity(text.len());
    let mut resume_at = 0;
    for (i, &c) in chars.iter().enumerate() {
        if i < resume_at {
            continue;
        }
        let Some(f) = forms(c) else {
            out.push(c);
            continue;
        };
        let joins_prev = joins_backward(c)
            && neighbour(i, false).is_some_and(|(_, p)| joins_forward(p));
        let next = neighbour(i, true);

        if c == LAM {
            if let Some((j, (iso, fin))) = next.and_then(|(j, n)| lam_alef(n).map(|l| (j, l))) {
                out.push(if joins_prev { fin } else { iso });
                // Marks between lam and alef stay attached to the ligature.
                for &mark in &chars[i + 1..j] {
                    out.push(mark);
                }
                resume_at = j + 1;
                continue;
            }
        }

        let joins_next = f.initial.is_some() && next.is_some_and(|(_, n)| joins_backward(n));
        let glyph = match (joins_prev, joins_next) {
            (false, false) => f.isolated,
            (true, false) => f.final_,
            (false, true) => f.initial.unwrap_or(f.isolated),
            (true, true) => f.medial.unwrap_or(f.final_),
        };
        out.push(glyph);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_positional_forms() {
        // beh beh beh: initial, medial, final
        assert_eq!(reshape("\u{0628}\u{0628}\u{0628}"), "\u{fe91}\u{fe92}\u{fe90}");
        // single letter stays isolated
        assert_eq!(reshape("\u{0628}"), "\u{fe8f}");
    }

    #[test]
    fn right_joining_letters_break_the_chain() {
        // beh alef beh: initial beh, final alef, isolated beh
        assert_eq!(reshape("\u{0628}\u{0627}\u{0628}"), "\u{fe91}\u{fe8e}\u{fe8f}");
    }

    #[test]
    fn lam_alef_ligature() {
        // "la": isolated ligature
        assert_eq!(reshape("\u{0644}\u{0627}"), "\u{fefb}");
        // beh + lam + alef: ligature in final form
        assert_eq!(reshape("\u{0628}\u{0644}\u{0627}"), "\u{fe91}\u{fefc}");
    }

    #[test]
    fn marks_do_not_break_joining() {
        // beh, fatha, beh
        assert_eq!(reshape("\u{0628}\u{064e}\u{0628}"), "\u{fe91}\u{064e}\u{fe90}");
    }

    #[test]
    fn persian_letters_join() {
        // peh peh peh: initial, medial, final
        assert_eq!(reshape("\u{067e}\u{067e}\u{067e}"), "\u{fb58}\u{fb59}\u{fb57}");
        // beh + farsi yeh: beh keeps its initial form
        assert_eq!(reshape("\u{0628}\u{06cc}"), "\u{fe91}\u{fbfd}");
        // jeh is right-joining: gaf before it is initial, jeh final, beh after isolated
        assert_eq!(reshape("\u{06af}\u{0698}\u{0628}"), "\u{fb94}\u{fb8b}\u{fe8f}");
    }

    #[test]
    fn persian_word_is_fully_joined() {
        // "کتاب" (book): keheh initial, teh medial, alef final, beh isolated
        assert_eq!(
            reshape("\u{06a9}\u{062a}\u{0627}\u{0628}"),
            "\u{fb90}\u{fe98}\u{fe8e}\u{fe8f}"
        );
        // "چای" (tea): tcheh initial, alef final, farsi yeh isolated
        assert_eq!(reshape("\u{0686}\u{0627}\u{06cc}"), "\u{fb7c}\u{fe8e}\u{fbfc}");
    }

    #[test]
    fn leaves_other_scripts_alone() {
        assert_eq!(reshape("שלום, world"), "שלום, world");
        assert!(!contains_arabic("שלום"));
    }
}
