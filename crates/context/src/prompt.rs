//! Prompt composition
//!
//! Pure builders for reasoner prompts. Every template kind maps to a fixed
//! instruction block with a required output structure; the same inputs always
//! produce the same prompt.

use clinicheck_common::models::{Modality, SubjectContext, TemplateKind};

/// Directive sent with every image to obtain its text description
pub const IMAGE_DESCRIPTION_DIRECTIVE: &str = "Describe the observable content of this image in detail. \
Transcribe any visible text, values, units and reference ranges exactly as shown. \
Do not speculate beyond what is visible.";

/// Output fields required from clinical analyses
pub const CLINICAL_FIELDS: &[(&str, &str)] = &[
    ("Observation", "the finding or test name"),
    ("Value", "the reported value with its unit"),
    ("Normal Range", "the reference range for this subject"),
    ("Status", "normal, low, high or critical"),
    ("Potential Risk", "health risks associated with this value"),
    ("Remedy", "lifestyle or dietary steps to reduce the risk"),
    ("Specialist", "the kind of doctor to consult, if any"),
];

/// Output headings required from research paper reviews
pub const RESEARCH_FIELDS: &[(&str, &str)] = &[
    ("Problem Statement", "Summarize the core problem the paper is addressing."),
    (
        "Literature Survey",
        "Summarize the key papers referenced in the literature survey. Present them in a table \
         with columns: Paper Title, Methodology Used, Datasets, Performance Metrics, and Limitations.",
    ),
    ("Methodology", "Summarize the methodology used in the paper."),
    ("Dataset", "Describe the dataset used in the paper."),
    ("Performance Metrics", "Outline the performance metrics used to evaluate the approach."),
    ("Limitations", "Highlight the limitations mentioned in the paper."),
];

/// Everything a template needs besides its kind
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInput<'a> {
    /// Evidence text (one chunk, or the whole bundle)
    pub context: &'a str,

    /// Modality runs of `context`; when given, each run is rendered under its own label
    pub sections: &'a [(Modality, &'a str)],

    /// `(i, n)`: this prompt carries section `i` (1-based) of `n`
    pub part: Option<(usize, usize)>,

    pub subject: Option<&'a SubjectContext>,

    pub question: Option<&'a str>,
}

/// Build the prompt for `kind`
pub fn compose(kind: TemplateKind, input: &PromptInput<'_>) -> String {
    let mut prompt = String::from(preamble(kind));
    prompt.push_str("\n\n");

    if let Some(subject) = input.subject {
        prompt.push_str(&format!(
            "The subject is {}. Interpret values and reference ranges accordingly.\n\n",
            subject
        ));
    }

    prompt.push_str(&output_structure(kind));

    if let Some((i, n)) = input.part.filter(|&(_, n)| n > 1) {
        prompt.push_str(&format!(
            "\nDocument section {} of {}. Analyze only the content of this section; \
             the other sections are sent separately.\n",
            i, n
        ));
    }

    let sections: Vec<(&str, &str)> = if input.sections.is_empty() {
        vec![(context_label(kind), input.context.trim())]
    } else {
        input
            .sections
            .iter()
            .map(|&(modality, text)| (section_label(kind, modality), text.trim()))
            .collect()
    };

    if sections.iter().all(|(_, text)| text.is_empty()) {
        if kind == TemplateKind::ContextualQuestion {
            prompt.push_str("\nNo reports were provided. Answer as a general health question.\n");
        }
    } else {
        for (label, text) in sections.into_iter().filter(|(_, text)| !text.is_empty()) {
            prompt.push_str(&format!("\n{}:\n{}\n", label, text));
        }
    }

    if let Some(question) = input.question.map(str::trim).filter(|q| !q.is_empty()) {
        let label = if kind == TemplateKind::ContextualQuestion {
            "Question"
        } else {
            "Focus"
        };
        prompt.push_str(&format!("\n{}: {}\n", label, question));
    }

    prompt
}

fn context_label(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::ResearchPaper => "Paper Text",
        TemplateKind::ImageAnalysis => "Image Descriptions",
        TemplateKind::InitialAnalysis | TemplateKind::ContextualQuestion => "Report Text",
    }
}

fn section_label(kind: TemplateKind, modality: Modality) -> &'static str {
    match (modality, kind) {
        (Modality::ImageDerivedText, _) => "Image Descriptions",
        (Modality::Text, TemplateKind::ResearchPaper) => "Paper Text",
        (Modality::Text, _) => "Report Text",
    }
}

fn preamble(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::InitialAnalysis => {
            "You are an advanced AI medical assistant. Given the following report text, analyze \
             the values, identify normal ranges and potential risks, suggest remedies to avoid \
             those risks, and suggest which specialist doctor to consult if needed."
        }
        TemplateKind::ContextualQuestion => {
            "You are an advanced AI medical assistant. Use the data extracted from the reports and \
             images below to answer the user's question comprehensively. Provide relevant \
             information and possible diagnoses, and suggest specialist doctors if needed."
        }
        TemplateKind::ImageAnalysis => {
            "You are an advanced AI medical assistant. The following text describes medical \
             images. Analyze the findings, identify normal ranges and potential risks, suggest \
             remedies, and suggest which specialist doctor to consult if needed."
        }
        TemplateKind::ResearchPaper => {
            "Analyze the following research paper and extract the following information under \
             the specified headings."
        }
    }
}

fn output_structure(kind: TemplateKind) -> String {
    match kind {
        TemplateKind::ResearchPaper => RESEARCH_FIELDS
            .iter()
            .map(|(heading, guidance)| format!("- {}: {}\n", heading, guidance))
            .collect(),
        TemplateKind::ContextualQuestion => {
            let fields: Vec<&str> = CLINICAL_FIELDS.iter().map(|(name, _)| *name).collect();
            format!(
                "When your answer refers to specific findings, report each with the fields: {}.\n",
                fields.join(", ")
            )
        }
        TemplateKind::InitialAnalysis | TemplateKind::ImageAnalysis => {
            let mut structure =
                String::from("Report every finding as a separate entry with these fields:\n");
            for (name, guidance) in CLINICAL_FIELDS {
                structure.push_str(&format!("- {}: {}\n", name, guidance));
            }
            structure
        }
    }
}
