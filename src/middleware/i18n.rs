// src/middleware/i18n.rs

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

const DEFAULT_LANG: &str = "en";

// Extrator de idioma (só a língua primária: "pt-BR" -> "pt")
#[derive(Debug, Clone)]
pub struct Locale(pub String);

fn primary_language(header_value: Option<&str>) -> String {
    header_value
        .and_then(|raw| {
            accept_language::parse(raw)
                .first()
                .and_then(|tag| tag.split('-').next())
                .map(|lang| lang.to_lowercase())
        })
        .filter(|lang| !lang.is_empty())
        .unwrap_or_else(|| DEFAULT_LANG.to_string())
}

impl<S> FromRequestParts<S> for Locale
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok());
        Ok(Locale(primary_language(raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_highest_weighted_primary_tag() {
        assert_eq!(primary_language(Some("pt-BR,pt;q=0.9,en;q=0.8")), "pt");
        assert_eq!(primary_language(Some("en;q=0.5, pt-PT")), "pt");
    }

    #[test]
    fn falls_back_to_english() {
        assert_eq!(primary_language(None), "en");
        assert_eq!(primary_language(Some("")), "en");
    }
}
