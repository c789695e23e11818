use async_trait::async_trait;
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report, Section, SectionExt,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{TargetLang, Translation, Translator};
use crate::config::DeepLConfig;

const FREE_ENDPOINT: &str = "https://api-free.deepl.com";
const PRO_ENDPOINT: &str = "https://api.deepl.com";

pub struct DeepL {
    client: reqwest::Client,
    endpoint: String,
    auth_key: String,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    target_lang: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    #[serde(default)]
    detected_source_language: Option<String>,
    text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Usage {
    pub character_count: u64,
    pub character_limit: u64,
}

/// Free-plan keys end in `:fx` and are only accepted by the free endpoint.
fn default_endpoint(auth_key: &str) -> &'static str {
    if auth_key.ends_with(":fx") {
        FREE_ENDPOINT
    } else {
        PRO_ENDPOINT
    }
}

impl DeepL {
    pub fn new(config: &DeepLConfig) -> color_eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .wrap_err("failed to build http client")?;
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or_else(|| default_endpoint(&config.auth_key))
            .trim_end_matches('/')
            .to_owned();
        Ok(Self {
            client,
            endpoint,
            auth_key: config.auth_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Translates a fixed word so bad keys and unreachable endpoints show up
    /// before the bot starts polling.
    pub async fn self_test(&self) -> color_eyre::Result<()> {
        self.translate("test", TargetLang::EnGb)
            .await
            .wrap_err("DeepL self-test failed")
            .suggestion("check DEEPL_API_KEY and DEEPL_API_URL")?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn usage(&self) -> color_eyre::Result<Usage> {
        let response = self
            .client
            .get(format!("{}/v2/usage", self.endpoint))
            .header("Authorization", self.authorization())
            .send()
            .await
            .wrap_err("failed to reach DeepL")?;
        let response = check_status(response).await?;
        response.json().await.wrap_err("invalid usage response")
    }

    fn authorization(&self) -> String {
        format!("DeepL-Auth-Key {}", self.auth_key)
    }
}

#[async_trait]
impl Translator for DeepL {
    #[instrument(skip(self, text), err)]
    async fn translate(&self, text: &str, target: TargetLang) -> color_eyre::Result<Translation> {
        let request = TranslateRequest {
            text: [text],
            target_lang: target.code(),
        };
        let response = self
            .client
            .post(format!("{}/v2/translate", self.endpoint))
            .header("Authorization", self.authorization())
            .json(&request)
            .send()
            .await
            .wrap_err("failed to reach DeepL")?;
        let response: TranslateResponse = check_status(response)
            .await?
            .json()
            .await
            .wrap_err("invalid translation response")?;
        let translated = into_translation(response)?;
        debug!(detected = ?translated.detected_source_language, "translated");
        Ok(translated)
    }
}

fn into_translation(response: TranslateResponse) -> color_eyre::Result<Translation> {
    let first = response
        .translations
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("DeepL returned no translations"))?;
    Ok(Translation {
        text: first.text,
        detected_source_language: first.detected_source_language,
    })
}

async fn check_status(response: reqwest::Response) -> color_eyre::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, body: String) -> Report {
    let report = match status.as_u16() {
        403 => eyre!("DeepL rejected the auth key").suggestion("check DEEPL_API_KEY"),
        429 => eyre!("DeepL rate limit hit"),
        456 => eyre!("DeepL character quota exceeded"),
        _ => eyre!("DeepL answered {status}"),
    };
    report
        .section(status.to_string().header("status:"))
        .section(body.header("body:"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use color_eyre::Result;
    use reqwest::StatusCode;

    use super::*;

    fn config(auth_key: &str, endpoint: Option<&str>) -> DeepLConfig {
        DeepLConfig {
            auth_key: auth_key.to_owned(),
            endpoint: endpoint.map(str::to_owned),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn picks_endpoint_from_key() -> Result<()> {
        assert_eq!(DeepL::new(&config("abc:fx", None))?.endpoint(), FREE_ENDPOINT);
        assert_eq!(DeepL::new(&config("abc", None))?.endpoint(), PRO_ENDPOINT);
        assert_eq!(
            DeepL::new(&config("abc:fx", Some("http://localhost:3000/")))?.endpoint(),
            "http://localhost:3000"
        );
        Ok(())
    }

    #[test]
    fn request_body() -> Result<()> {
        let body = serde_json::to_value(TranslateRequest {
            text: ["bom dia"],
            target_lang: TargetLang::EnGb.code(),
        })?;
        assert_eq!(
            body,
            serde_json::json!({"text": ["bom dia"], "target_lang": "EN-GB"})
        );
        Ok(())
    }

    #[test]
    fn response_body() -> Result<()> {
        let response: TranslateResponse = serde_json::from_str(
            r#"{"translations":[{"detected_source_language":"PT","text":"Good morning"}]}"#,
        )?;
        assert_eq!(
            into_translation(response)?,
            Translation {
                text: "Good morning".to_owned(),
                detected_source_language: Some("PT".to_owned()),
            }
        );

        let empty: TranslateResponse = serde_json::from_str(r#"{"translations":[]}"#)?;
        assert!(into_translation(empty).is_err());
        Ok(())
    }

    #[test]
    fn usage_body() -> Result<()> {
        let usage: Usage =
            serde_json::from_str(r#"{"character_count":180118,"character_limit":1250000}"#)?;
        assert_eq!(usage.character_count, 180_118);
        assert_eq!(usage.character_limit, 1_250_000);
        Ok(())
    }

    #[test]
    fn status_errors_name_the_problem() {
        let quota = status_error(StatusCode::from_u16(456).unwrap(), String::new());
        assert!(quota.to_string().contains("quota"));
        let auth = status_error(StatusCode::FORBIDDEN, "{}".to_owned());
        assert!(auth.to_string().contains("auth key"));
        let other = status_error(StatusCode::BAD_GATEWAY, String::new());
        assert!(other.to_string().contains("502"));
    }
}
