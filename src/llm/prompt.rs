//! Family-aware prompt scaffolding (spec §4.5). The pipeline selects a
//! template by model family without needing to know anything about the
//! content being summarized or chatted about.

/// Prompt-template family, detected from the model descriptor rather than
/// from any generated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Llama,
    Mistral,
    Phi,
    Generic,
}

impl ModelFamily {
    /// Detect the family from a Hugging Face repo id (e.g.
    /// `"TheBloke/Llama-2-7B-Chat-GGUF"`).
    pub fn detect(repo: &str) -> Self {
        let lower = repo.to_lowercase();
        if lower.contains("llama") {
            ModelFamily::Llama
        } else if lower.contains("mistral") {
            ModelFamily::Mistral
        } else if lower.contains("phi") {
            ModelFamily::Phi
        } else {
            ModelFamily::Generic
        }
    }

    /// Wrap a system instruction + user turn in this family's chat format.
    pub fn format(&self, system: &str, user: &str) -> String {
        match self {
            ModelFamily::Llama => {
                format!("[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{user} [/INST]")
            }
            ModelFamily::Mistral => {
                format!("<s>[INST] {system}\n\n{user} [/INST]")
            }
            ModelFamily::Phi => {
                format!("<|system|>\n{system}<|end|>\n<|user|>\n{user}<|end|>\n<|assistant|>\n")
            }
            ModelFamily::Generic => {
                format!("{system}\n\n{user}\n")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_family_from_repo_name() {
        assert_eq!(ModelFamily::detect("TheBloke/Llama-2-7B-GGUF"), ModelFamily::Llama);
        assert_eq!(ModelFamily::detect("TheBloke/Mistral-7B-Instruct-GGUF"), ModelFamily::Mistral);
        assert_eq!(ModelFamily::detect("microsoft/Phi-3-mini-4k-instruct-gguf"), ModelFamily::Phi);
        assert_eq!(ModelFamily::detect("some/unknown-model"), ModelFamily::Generic);
    }

    #[test]
    fn format_embeds_both_turns() {
        let out = ModelFamily::Llama.format("You are helpful.", "Summarize this.");
        assert!(out.contains("You are helpful."));
        assert!(out.contains("Summarize this."));
    }
}
