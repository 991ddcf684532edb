// src/common/i18n.rs

use std::{collections::HashMap, sync::OnceLock};

// Catálogos embutidos no binário: código -> mensagem
const CATALOGS: &[(&str, &str)] = &[
    ("en", include_str!("../../locales/en.json")),
    ("pt", include_str!("../../locales/pt.json")),
];

const FALLBACK_LANG: &str = "en";

#[derive(Debug, Default)]
pub struct I18nStore {
    messages: HashMap<String, HashMap<String, String>>,
}

impl I18nStore {
    pub fn load() -> Self {
        let mut messages = HashMap::new();
        for (lang, raw) in CATALOGS {
            match serde_json::from_str::<HashMap<String, String>>(raw) {
                Ok(catalog) => {
                    messages.insert(lang.to_string(), catalog);
                }
                Err(e) => tracing::error!("Catálogo de mensagens '{}' inválido: {}", lang, e),
            }
        }
        Self { messages }
    }

    /// Instância compartilhada (imutável) usada onde não há `AppState` à mão.
    pub fn global() -> &'static I18nStore {
        static STORE: OnceLock<I18nStore> = OnceLock::new();
        STORE.get_or_init(I18nStore::load)
    }

    /// Busca a mensagem no idioma pedido, depois no inglês, e por fim devolve o próprio código.
    pub fn message(&self, lang: &str, code: &str) -> String {
        [lang, FALLBACK_LANG]
            .iter()
            .find_map(|l| self.messages.get(*l).and_then(|c| c.get(code)))
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }
}
