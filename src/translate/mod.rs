pub mod deepl;

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLang {
    EnGb,
    PtPt,
}

impl TargetLang {
    pub fn code(self) -> &'static str {
        match self {
            Self::EnGb => "EN-GB",
            Self::PtPt => "PT-PT",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Self::EnGb => "🇬🇧",
            Self::PtPt => "🇵🇹",
        }
    }

    /// Base language, lowercase, without region.
    pub fn language(self) -> &'static str {
        match self {
            Self::EnGb => "en",
            Self::PtPt => "pt",
        }
    }

    fn other(self) -> Self {
        match self {
            Self::EnGb => Self::PtPt,
            Self::PtPt => Self::EnGb,
        }
    }

    /// The target whose base language matches `tag` (`"en"`, `"PT"`, `"pt-BR"`...).
    pub fn from_language_tag(tag: &str) -> Option<Self> {
        let base = tag.split(['-', '_']).next()?.to_ascii_lowercase();
        [Self::EnGb, Self::PtPt]
            .into_iter()
            .find(|target| target.language() == base)
    }
}

impl fmt::Display for TargetLang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What the service returned for one target language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub detected_source_language: Option<String>,
}

impl Translation {
    /// Whether the text actually changed.
    ///
    /// Text that comes back unchanged (ignoring case) is taken to mean the
    /// source was already in the target language.
    pub fn translates(&self, source: &str) -> bool {
        self.text.to_lowercase() != source.to_lowercase()
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target: TargetLang) -> color_eyre::Result<Translation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Ask for both targets and keep every one that changed the text.
    Both,
    /// Ask for Portuguese first and use the detected source language to pick
    /// a single direction.
    Detect,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bilingual {
    pub english: Option<String>,
    pub portuguese: Option<String>,
}

impl Bilingual {
    fn set(&mut self, target: TargetLang, text: String) {
        match target {
            TargetLang::EnGb => self.english = Some(text),
            TargetLang::PtPt => self.portuguese = Some(text),
        }
    }

    fn into_option(self) -> Option<Self> {
        (self.english.is_some() || self.portuguese.is_some()).then_some(self)
    }

    /// English line first, Portuguese line second.
    pub fn render(&self) -> String {
        [
            (TargetLang::EnGb, &self.english),
            (TargetLang::PtPt, &self.portuguese),
        ]
        .into_iter()
        .filter_map(|(target, text)| text.as_ref().map(|text| format!("{} {text}", target.flag())))
        .collect::<Vec<_>>()
        .join("\n")
    }
}

pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Translates `text` between English and Portuguese.
///
/// `language_hint` is a source language known in advance (for example the
/// one detected by the transcriber); when it is English or Portuguese only
/// the opposite direction is requested. Failures are logged and count as no
/// translation for that direction.
#[instrument(skip(translator, text), fields(chars = text.chars().count()))]
pub async fn translate_bilingual(
    translator: &dyn Translator,
    text: &str,
    strategy: Strategy,
    language_hint: Option<&str>,
) -> Option<Bilingual> {
    let text = clean_text(text);
    if text.is_empty() {
        return None;
    }

    if let Some(source) = language_hint.and_then(TargetLang::from_language_tag) {
        let target = source.other();
        debug!(%source, %target, "using language hint");
        let mut result = Bilingual::default();
        if let Some(translated) = attempt(translator, &text, target).await {
            result.set(target, translated);
        }
        return result.into_option();
    }

    match strategy {
        Strategy::Both => both(translator, &text).await,
        Strategy::Detect => detect(translator, &text).await,
    }
}

async fn both(translator: &dyn Translator, text: &str) -> Option<Bilingual> {
    let (english, portuguese) = tokio::join!(
        attempt(translator, text, TargetLang::EnGb),
        attempt(translator, text, TargetLang::PtPt),
    );
    Bilingual {
        english,
        portuguese,
    }
    .into_option()
}

async fn detect(translator: &dyn Translator, text: &str) -> Option<Bilingual> {
    let mut result = Bilingual::default();
    match request(translator, text, TargetLang::PtPt).await {
        Some(portuguese)
            if portuguese
                .detected_source_language
                .as_deref()
                .and_then(TargetLang::from_language_tag)
                == Some(TargetLang::PtPt) =>
        {
            debug!("source detected as portuguese");
            result.english = attempt(translator, text, TargetLang::EnGb).await;
        }
        Some(portuguese) if portuguese.translates(text) => {
            result.portuguese = Some(portuguese.text);
        }
        _ => {
            result.english = attempt(translator, text, TargetLang::EnGb).await;
        }
    }
    result.into_option()
}

async fn attempt(translator: &dyn Translator, text: &str, target: TargetLang) -> Option<String> {
    let translation = request(translator, text, target).await?;
    if translation.translates(text) {
        Some(translation.text)
    } else {
        debug!(%target, "unchanged, skipping");
        None
    }
}

async fn request(translator: &dyn Translator, text: &str, target: TargetLang) -> Option<Translation> {
    match translator.translate(text, target).await {
        Ok(translation) => Some(translation),
        Err(err) => {
            warn!(%target, ?err, "translation failed");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use async_trait::async_trait;
    use color_eyre::eyre::eyre;

    use super::*;

    /// Canned answers per target language; a missing entry is an error.
    #[derive(Default)]
    pub struct FakeTranslator {
        answers: HashMap<&'static str, Translation>,
        calls: Mutex<Vec<TargetLang>>,
    }

    impl FakeTranslator {
        pub fn answer(mut self, target: TargetLang, text: &str, detected: Option<&str>) -> Self {
            self.answers.insert(
                target.code(),
                Translation {
                    text: text.to_owned(),
                    detected_source_language: detected.map(str::to_owned),
                },
            );
            self
        }

        pub fn calls(&self) -> Vec<TargetLang> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(&self, _text: &str, target: TargetLang) -> color_eyre::Result<Translation> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(target);
            }
            self.answers
                .get(target.code())
                .cloned()
                .ok_or_else(|| eyre!("service unavailable"))
        }
    }

    #[test]
    fn cleans_whitespace() {
        assert_eq!(clean_text("  olá \n\t mundo  "), "olá mundo");
        assert_eq!(clean_text(" \n "), "");
    }

    #[test]
    fn identical_text_ignoring_case_is_not_a_translation() {
        let translation = Translation {
            text: "HELLO there".to_owned(),
            detected_source_language: None,
        };
        assert!(!translation.translates("hello THERE"));
        assert!(translation.translates("olá"));
    }

    #[test]
    fn detected_language_does_not_hide_changed_text() {
        let translation = Translation {
            text: "autocarro".to_owned(),
            detected_source_language: Some("PT".to_owned()),
        };
        assert!(translation.translates("ônibus"));
    }

    #[test]
    fn language_tags() {
        assert_eq!(TargetLang::from_language_tag("PT"), Some(TargetLang::PtPt));
        assert_eq!(TargetLang::from_language_tag("pt-BR"), Some(TargetLang::PtPt));
        assert_eq!(TargetLang::from_language_tag("en"), Some(TargetLang::EnGb));
        assert_eq!(TargetLang::from_language_tag("de"), None);
        assert_eq!(TargetLang::from_language_tag(""), None);
    }

    #[test]
    fn renders_english_first() {
        let bilingual = Bilingual {
            english: Some("Good morning".to_owned()),
            portuguese: Some("Bom dia".to_owned()),
        };
        assert_eq!(bilingual.render(), "🇬🇧 Good morning\n🇵🇹 Bom dia");
    }

    #[tokio::test]
    async fn both_directions() {
        let translator = FakeTranslator::default()
            .answer(TargetLang::EnGb, "Good morning", Some("PT"))
            .answer(TargetLang::PtPt, "Bom dia!", Some("PT"));
        let result = translate_bilingual(&translator, "bom  dia", Strategy::Both, None).await;
        assert_eq!(
            result.map(|b| b.render()),
            Some("🇬🇧 Good morning\n🇵🇹 Bom dia!".to_owned())
        );
    }

    #[tokio::test]
    async fn one_failed_direction_keeps_the_other() {
        let translator = FakeTranslator::default().answer(TargetLang::PtPt, "Olá", None);
        let result = translate_bilingual(&translator, "Hello", Strategy::Both, None).await;
        assert_eq!(result.map(|b| b.render()), Some("🇵🇹 Olá".to_owned()));
        assert_eq!(translator.calls().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_everywhere_is_none() {
        let translator = FakeTranslator::default()
            .answer(TargetLang::EnGb, "ok", None)
            .answer(TargetLang::PtPt, "OK", None);
        assert_eq!(translate_bilingual(&translator, "Ok", Strategy::Both, None).await, None);
    }

    #[tokio::test]
    async fn blank_text_skips_the_service() {
        let translator = FakeTranslator::default();
        assert_eq!(translate_bilingual(&translator, " \n ", Strategy::Both, None).await, None);
        assert!(translator.calls().is_empty());
    }

    #[tokio::test]
    async fn detect_translates_portuguese_to_english() {
        let translator = FakeTranslator::default()
            .answer(TargetLang::PtPt, "obrigado", Some("PT"))
            .answer(TargetLang::EnGb, "thank you", Some("PT"));
        let result = translate_bilingual(&translator, "obrigado", Strategy::Detect, None).await;
        assert_eq!(result.map(|b| b.render()), Some("🇬🇧 thank you".to_owned()));
        assert_eq!(translator.calls(), vec![TargetLang::PtPt, TargetLang::EnGb]);
    }

    #[tokio::test]
    async fn detect_translates_english_to_portuguese_only() {
        let translator = FakeTranslator::default()
            .answer(TargetLang::PtPt, "obrigado", Some("EN"))
            .answer(TargetLang::EnGb, "thanks", Some("EN"));
        let result = translate_bilingual(&translator, "thanks", Strategy::Detect, None).await;
        assert_eq!(result.map(|b| b.render()), Some("🇵🇹 obrigado".to_owned()));
        assert_eq!(translator.calls(), vec![TargetLang::PtPt]);
    }

    #[tokio::test]
    async fn hint_requests_only_the_opposite_language() {
        let translator = FakeTranslator::default()
            .answer(TargetLang::PtPt, "olá mundo", None)
            .answer(TargetLang::EnGb, "hello world", None);
        let result = translate_bilingual(&translator, "hello world", Strategy::Both, Some("en")).await;
        assert_eq!(result.map(|b| b.render()), Some("🇵🇹 olá mundo".to_owned()));
        assert_eq!(translator.calls(), vec![TargetLang::PtPt]);
    }
}
