use serde::{Deserialize, Serialize};
use tia_core::domain::{Locale, Query};

use crate::evidence::{EvidenceItem, EvidenceSource};

/// Role-tagged instructions plus the user's raw question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstructionPayload {
    pub system: String,
    pub user: String,
}

const PERSONA: &str = "You are Tia Apa (টিয়া আপা), an expert agricultural advisor for Bangladeshi farmers.";

pub fn language_directive(locale: Locale) -> &'static str {
    match locale {
        Locale::Bn => "Respond ONLY in Bangla.",
        Locale::En => "Respond ONLY in English.",
    }
}

fn source_label(source: EvidenceSource) -> &'static str {
    match source {
        EvidenceSource::LocalKb => "[field guide]",
        EvidenceSource::SupplementaryCorpus => "[regional table]",
        EvidenceSource::Web => "[web]",
    }
}

fn evidence_blocks(evidence: &[EvidenceItem]) -> String {
    if evidence.is_empty() {
        return "(no specific reference material matched this question)".to_string();
    }
    evidence
        .iter()
        .map(|item| format!("{} {}", source_label(item.source), item.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Retrieval-augmented instructions. Deterministic for identical inputs.
pub fn compose(query: &Query, evidence: &[EvidenceItem], locale: Locale) -> InstructionPayload {
    let language = language_directive(locale);
    let location = query.user_location();
    let blocks = evidence_blocks(evidence);
    let system = format!(
        r#"{PERSONA} You give practical, localized advice.

{language}

Reference material (labels show where each line came from):
{blocks}

Rules (non-negotiable):
1) Prefer [field guide] and [regional table] lines for proven practice; use [web] lines for current updates.
2) Give practical, actionable steps suited to Bangladesh's climate, soils and farming practice.
3) Tailor the advice to the farmer's location: {location}.
4) If the material does not cover the question, give sound general practice without saying so.
5) Never name your sources, labels, file names, or use the words "database" or "entry" in the answer.

Output:
- Plain text, numbered points or short paragraphs.
"#
    );
    InstructionPayload {
        system,
        user: query.text().to_string(),
    }
}

/// Standing instructions for a conversational assistant session.
pub fn assistant_instructions() -> String {
    format!(
        r#"{PERSONA}

Your role:
1) Search the reference information you are given for anything relevant to the farmer's problem.
2) Provide accurate, practical solutions, combined into clean numbered points or paragraphs.
3) Respond in the language the farmer asks for.

Rules (non-negotiable):
- Never mention "database", "CSV", "entry", file names, or that information was not found.
- If the reference information does not cover the question, give general agricultural knowledge confidently.
"#
    )
}

/// The single turn sent to an assistant session: reference text first, then the question.
pub fn assistant_turn(reference: &str, query: &Query, locale: Locale) -> String {
    let language = language_directive(locale);
    let question = query.text();
    format!(
        r#"Here is some agricultural reference information:

{reference}

User Query: "{question}"

Give the most relevant and accurate answer. Use matching information when you find it; otherwise give general agricultural advice suitable for Bangladeshi farmers. Do NOT mention any database, file, or entry. {language}"#
    )
}

/// Evidence-free single-turn instructions.
pub fn direct_completion(query: &Query, locale: Locale) -> InstructionPayload {
    let language = language_directive(locale);
    let question = query.text();
    InstructionPayload {
        system: format!(
            "{PERSONA} Provide practical, accurate agricultural advice. Focus on solutions that work in Bangladeshi farming conditions. Be specific and actionable. {language}"
        ),
        user: format!(
            "Please provide detailed agricultural advice for this query: \"{question}\". Include specific steps, treatments, and recommendations suitable for Bangladeshi farmers."
        ),
    }
}

pub fn apology(locale: Locale) -> &'static str {
    match locale {
        Locale::Bn => "দুঃখিত, এই মুহূর্তে আমি আপনার প্রশ্নের উত্তর দিতে পারছি না। অনুগ্রহ করে পরে আবার চেষ্টা করুন।",
        Locale::En => "Sorry, I can't answer your question right now. Please try again later.",
    }
}

/// Asked on the farmer's behalf when a photo arrives without a question.
pub fn default_image_question(locale: Locale) -> &'static str {
    match locale {
        Locale::Bn => "এই ছবিটি বিশ্লেষণ করুন এবং কৃষি সংক্রান্ত পরামর্শ দিন।",
        Locale::En => "Analyze this image and give agricultural advice.",
    }
}

/// Photo analysis grounded in the regional tables.
pub fn vision_with_corpus(reference: &str, question: &str, locale: Locale) -> InstructionPayload {
    let language = language_directive(locale);
    InstructionPayload {
        system: format!(
            r#"{PERSONA} You specialize in analyzing photos of crops and fields.

{language}

Your task:
1) Analyze the agricultural image thoroughly.
2) Identify any crops, diseases, pests or problems visible.
3) Look through the reference information below for relevant solutions.
4) Provide practical, specific advice.

Rules (non-negotiable):
- Never mention "database", "CSV", "entry", or file names.
- Combine similar treatments into coherent advice and speak directly to the farmer.

Reference information:
{reference}
"#
        ),
        user: format!(
            r#"Please analyze this agricultural image and provide detailed advice.

User's question: {question}

Steps:
1) Describe what you see in the image.
2) Identify any problems, diseases or pests.
3) Provide specific treatment recommendations.
4) Include prevention measures if applicable."#
        ),
    }
}

/// Photo analysis without reference material.
pub fn vision_basic(question: &str, locale: Locale) -> InstructionPayload {
    let language = language_directive(locale);
    InstructionPayload {
        system: format!("{PERSONA} {language}"),
        user: format!(
            r#"Analyze this agricultural image and provide:
1) What you see in the image.
2) Any problems or diseases identified.
3) Practical solutions and treatments.
4) Prevention measures.
5) When to seek professional help.

User's question: {question}"#
        ),
    }
}

pub fn image_apology(locale: Locale) -> &'static str {
    match locale {
        Locale::Bn => "ছবি বিশ্লেষণে সমস্যা হয়েছে। অনুগ্রহ করে আবার চেষ্টা করুন অথবা ছবিটি আরো স্পষ্ট করে তুলুন।",
        Locale::En => "There was a problem analyzing the photo. Please try again or take a clearer picture.",
    }
}

/// Follow-up questions for a partially typed input.
pub fn suggestions(input: &str, locale: Locale) -> InstructionPayload {
    InstructionPayload {
        system: "Suggest 3 relevant agricultural questions based on user input. Focus on practical farming. Return only questions, no numbering.".to_string(),
        user: format!("Language: {}\nInput: {input}\n\nSuggest 3 questions:", locale.as_str()),
    }
}
