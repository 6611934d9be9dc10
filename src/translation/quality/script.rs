/*!
 * Script detection and Serbian Cyrillic/Latin transliteration.
 */

use crate::language_utils::Script;

/// Letter counts per writing system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptStats {
    pub latin: usize,
    pub cyrillic: usize,
    pub cjk: usize,
    pub other: usize,
}

impl ScriptStats {
    /// Count the letters of `text`
    pub fn of(text: &str) -> Self {
        let mut stats = Self::default();
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            if is_cjk(c) {
                stats.cjk += 1;
            } else if is_cyrillic(c) {
                stats.cyrillic += 1;
            } else if c.is_ascii_alphabetic() || is_latin_extended(c) {
                stats.latin += 1;
            } else {
                stats.other += 1;
            }
        }
        stats
    }

    pub fn letters(&self) -> usize {
        self.latin + self.cyrillic + self.cjk + self.other
    }

    /// Share of letters written in `script`, 1.0 for text without letters
    pub fn share(&self, script: Script) -> f64 {
        let total = self.letters();
        if total == 0 {
            return 1.0;
        }
        let hits = match script {
            Script::Latin => self.latin,
            Script::Cyrillic => self.cyrillic,
        };
        hits as f64 / total as f64
    }

    /// Script with the most letters, if it is one we can enforce
    pub fn dominant(&self) -> Option<Script> {
        if self.letters() == 0 {
            return None;
        }
        if self.cyrillic > self.latin && self.cyrillic >= self.cjk + self.other {
            Some(Script::Cyrillic)
        } else if self.latin >= self.cjk + self.other {
            Some(Script::Latin)
        } else {
            None
        }
    }
}

/// CJK ideographs, kana and hangul
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2FA1F)
}

pub fn is_cyrillic(c: char) -> bool {
    matches!(c as u32, 0x0400..=0x052F | 0x1C80..=0x1C8F | 0x2DE0..=0x2DFF | 0xA640..=0xA69F)
}

fn is_latin_extended(c: char) -> bool {
    matches!(c as u32, 0x00C0..=0x024F | 0x1E00..=0x1EFF)
}

/// Whether enough of the letters are in the target script
pub fn matches_script(text: &str, script: Script, threshold: f64) -> bool {
    ScriptStats::of(text).share(script) >= threshold
}

/// Guess a language tag from the alphabet alone
///
/// Only used when a reader declares nothing; it separates Serbian from
/// other Cyrillic text by the letters only Serbian uses.
pub fn guess_language(text: &str) -> Option<&'static str> {
    let stats = ScriptStats::of(text);
    if stats.letters() == 0 {
        return None;
    }
    if stats.cyrillic * 2 > stats.letters() {
        let serbian = text
            .chars()
            .any(|c| matches!(c, 'ђ' | 'ћ' | 'џ' | 'љ' | 'њ' | 'ј' | 'Ђ' | 'Ћ' | 'Џ' | 'Љ' | 'Њ' | 'Ј'));
        return Some(if serbian { "sr" } else { "ru" });
    }
    if stats.cjk * 2 > stats.letters() {
        return Some("zh");
    }
    None
}

fn cyrillic_to_latin(c: char) -> Option<&'static str> {
    let s = match c {
        'А' => "A", 'Б' => "B", 'В' => "V", 'Г' => "G", 'Д' => "D", 'Ђ' => "Đ",
        'Е' => "E", 'Ж' => "Ž", 'З' => "Z", 'И' => "I", 'Ј' => "J", 'К' => "K",
        'Л' => "L", 'Љ' => "Lj", 'М' => "M", 'Н' => "N", 'Њ' => "Nj", 'О' => "O",
        'П' => "P", 'Р' => "R", 'С' => "S", 'Т' => "T", 'Ћ' => "Ć", 'У' => "U",
        'Ф' => "F", 'Х' => "H", 'Ц' => "C", 'Ч' => "Č", 'Џ' => "Dž", 'Ш' => "Š",
        'а' => "a", 'б' => "b", 'в' => "v", 'г' => "g", 'д' => "d", 'ђ' => "đ",
        'е' => "e", 'ж' => "ž", 'з' => "z", 'и' => "i", 'ј' => "j", 'к' => "k",
        'л' => "l", 'љ' => "lj", 'м' => "m", 'н' => "n", 'њ' => "nj", 'о' => "o",
        'п' => "p", 'р' => "r", 'с' => "s", 'т' => "t", 'ћ' => "ć", 'у' => "u",
        'ф' => "f", 'х' => "h", 'ц' => "c", 'ч' => "č", 'џ' => "dž", 'ш' => "š",
        _ => return None,
    };
    Some(s)
}

fn latin_digraph_to_cyrillic(a: char, b: char) -> Option<char> {
    match (a, b) {
        ('L', 'j') | ('L', 'J') => Some('Љ'),
        ('l', 'j') => Some('љ'),
        ('N', 'j') | ('N', 'J') => Some('Њ'),
        ('n', 'j') => Some('њ'),
        ('D', 'ž') | ('D', 'Ž') => Some('Џ'),
        ('d', 'ž') => Some('џ'),
        _ => None,
    }
}

fn latin_to_cyrillic(c: char) -> Option<char> {
    let mapped = match c {
        'A' => 'А', 'B' => 'Б', 'V' => 'В', 'G' => 'Г', 'D' => 'Д', 'Đ' => 'Ђ',
        'E' => 'Е', 'Ž' => 'Ж', 'Z' => 'З', 'I' => 'И', 'J' => 'Ј', 'K' => 'К',
        'L' => 'Л', 'M' => 'М', 'N' => 'Н', 'O' => 'О', 'P' => 'П', 'R' => 'Р',
        'S' => 'С', 'T' => 'Т', 'Ć' => 'Ћ', 'U' => 'У', 'F' => 'Ф', 'H' => 'Х',
        'C' => 'Ц', 'Č' => 'Ч', 'Š' => 'Ш',
        'a' => 'а', 'b' => 'б', 'v' => 'в', 'g' => 'г', 'd' => 'д', 'đ' => 'ђ',
        'e' => 'е', 'ž' => 'ж', 'z' => 'з', 'i' => 'и', 'j' => 'ј', 'k' => 'к',
        'l' => 'л', 'm' => 'м', 'n' => 'н', 'o' => 'о', 'p' => 'п', 'r' => 'р',
        's' => 'с', 't' => 'т', 'ć' => 'ћ', 'u' => 'у', 'f' => 'ф', 'h' => 'х',
        'c' => 'ц', 'č' => 'ч', 'š' => 'ш',
        _ => return None,
    };
    Some(mapped)
}

/// Transliterate Serbian Cyrillic to Latin
pub fn to_latin(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match cyrillic_to_latin(c) {
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

/// Transliterate Serbian Latin to Cyrillic, digraphs first
pub fn to_cyrillic(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(&next) = chars.get(i + 1) {
            if let Some(c) = latin_digraph_to_cyrillic(chars[i], next) {
                out.push(c);
                i += 2;
                continue;
            }
        }
        out.push(latin_to_cyrillic(chars[i]).unwrap_or(chars[i]));
        i += 1;
    }
    out
}

/// Convert text into `target` unless it is already there
pub fn convert(text: &str, target: Script) -> String {
    match (ScriptStats::of(text).dominant(), target) {
        (Some(Script::Cyrillic), Script::Latin) => to_latin(text),
        (Some(Script::Latin), Script::Cyrillic) => to_cyrillic(text),
        _ => text.to_string(),
    }
}

/// Transliterate every letter into `target`, whatever script dominates
pub fn transliterate(text: &str, target: Script) -> String {
    match target {
        Script::Latin => to_latin(text),
        Script::Cyrillic => to_cyrillic(text),
    }
}
