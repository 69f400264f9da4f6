//! Language table used to normalize track names printed by the tool.

use std::collections::HashSet;

struct Language {
    names: &'static [&'static str],
    /// Code the tool accepts for `--dubLang`.
    audio: &'static str,
    /// Canonical subtitle locale.
    locale: &'static str,
}

const LANGUAGES: &[Language] = &[
    Language {
        names: &["english", "english (us)"],
        audio: "eng",
        locale: "en-US",
    },
    Language {
        names: &["japanese"],
        audio: "jpn",
        locale: "ja-JP",
    },
    Language {
        names: &[
            "spanish (latin america)",
            "latin american spanish",
            "spanish (latam)",
            "spanish",
        ],
        audio: "spa",
        locale: "es-419",
    },
    Language {
        names: &["spanish (spain)", "castilian", "european spanish"],
        audio: "spa-es",
        locale: "es-ES",
    },
    Language {
        names: &["portuguese (brazil)", "brazilian portuguese", "portuguese"],
        audio: "por",
        locale: "pt-BR",
    },
    Language {
        names: &["portuguese (portugal)", "european portuguese"],
        audio: "por",
        locale: "pt-PT",
    },
    Language {
        names: &["french"],
        audio: "fra",
        locale: "fr-FR",
    },
    Language {
        names: &["german"],
        audio: "deu",
        locale: "de-DE",
    },
    Language {
        names: &["italian"],
        audio: "ita",
        locale: "it-IT",
    },
    Language {
        names: &["russian"],
        audio: "rus",
        locale: "ru-RU",
    },
    Language {
        names: &["arabic"],
        audio: "ara",
        locale: "ar-SA",
    },
    Language {
        names: &["hindi"],
        audio: "hin",
        locale: "hi-IN",
    },
    Language {
        names: &["chinese (mandarin)", "mandarin", "chinese", "chinese (simplified)"],
        audio: "cmn",
        locale: "zh-CN",
    },
    Language {
        names: &["chinese (taiwan)", "chinese (traditional)", "traditional chinese"],
        audio: "chi",
        locale: "zh-TW",
    },
    Language {
        names: &["korean"],
        audio: "kor",
        locale: "ko-KR",
    },
    Language {
        names: &["thai"],
        audio: "tha",
        locale: "th-TH",
    },
    Language {
        names: &["indonesian"],
        audio: "ind",
        locale: "id-ID",
    },
    Language {
        names: &["vietnamese"],
        audio: "vie",
        locale: "vi-VN",
    },
    Language {
        names: &["malay"],
        audio: "msa",
        locale: "ms-MY",
    },
    Language {
        names: &["turkish"],
        audio: "tur",
        locale: "tr-TR",
    },
    Language {
        names: &["polish"],
        audio: "pol",
        locale: "pl-PL",
    },
    Language {
        names: &["catalan"],
        audio: "cat",
        locale: "ca-ES",
    },
    Language {
        names: &["tamil"],
        audio: "tam",
        locale: "ta-IN",
    },
    Language {
        names: &["telugu"],
        audio: "tel",
        locale: "te-IN",
    },
];

fn by_name(name: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|lang| lang.names.contains(&name))
}

fn by_audio_code(code: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|lang| lang.audio == code)
}

/// Removes bracketed or parenthesized chunks: `"English (CC)"` -> `"English"`.
fn strip_brackets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Looks a token up as written first, then with its bracketed qualifiers removed.
fn lookup_name(token: &str) -> Option<&'static Language> {
    let lowered = token.trim().to_lowercase();
    by_name(&lowered).or_else(|| by_name(&strip_brackets(&lowered)))
}

/// Normalizes an audio track token to a lowercase dub code.
///
/// Accepts display names (`"English"`, `"Spanish (Latin America)"`) and known codes.
#[must_use]
pub fn normalize_audio(token: &str) -> Option<String> {
    let trimmed = token.trim().trim_start_matches('☆').trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(lang) = lookup_name(trimmed) {
        return Some(lang.audio.to_string());
    }

    let lowered = strip_brackets(&trimmed.to_lowercase());
    by_audio_code(&lowered).map(|lang| lang.audio.to_string())
}

/// Normalizes a subtitle token to a canonical locale such as `en-US`.
#[must_use]
pub fn normalize_subtitle(token: &str) -> Option<String> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(lang) = lookup_name(trimmed) {
        return Some(lang.locale.to_string());
    }

    let lowered = strip_brackets(&trimmed.to_lowercase());
    if let Some(lang) = by_audio_code(&lowered) {
        return Some(lang.locale.to_string());
    }

    canonical_locale(&lowered)
}

/// Canonical spelling of a known subtitle locale, matched case-insensitively.
#[must_use]
pub fn canonical_locale(locale: &str) -> Option<String> {
    LANGUAGES
        .iter()
        .find(|lang| lang.locale.eq_ignore_ascii_case(locale.trim()))
        .map(|lang| lang.locale.to_string())
}

/// `en-US` -> `en`.
#[must_use]
pub fn base_language(locale: &str) -> &str {
    locale.split(['-', '_']).next().unwrap_or(locale)
}

/// Removes case-insensitive duplicates, keeping the first spelling and the original order.
#[must_use]
pub fn dedupe_casefold<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let value = value.into();
        if seen.insert(value.to_lowercase()) {
            out.push(value);
        }
    }
    out
}
