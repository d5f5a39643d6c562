use super::{Translate, TranslationRequest};

/// Returns the source text unchanged; for dry runs and tests.
pub struct Echo {
    name: String,
}

impl Echo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Translate for Echo {
    fn name(&self) -> &str {
        &self.name
    }

    fn translate(&mut self, req: &TranslationRequest<'_>) -> anyhow::Result<String> {
        Ok(req.source_text.to_string())
    }
}
