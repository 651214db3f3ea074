//! Task-type inference: regex-weighted scoring of prompt text into one of
//! nine fixed categories plus a confidence score.
//!
//! Patterns are compiled once via [`once_cell::sync::Lazy`] — recompiling a
//! ~90-pattern catalogue on every request would blow the <5ms/call budget.
//! Grounded on the compiled-pattern-catalogue idiom used for regex-heavy
//! classifiers elsewhere in the reference pack (same `regex` +
//! `once_cell::sync::Lazy` pairing).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    CodeReview,
    Summarization,
    Analysis,
    CreativeWriting,
    DataExtraction,
    Translation,
    QuestionAnswering,
    General,
}

impl TaskType {
    /// Declaration order — used to break score ties.
    const ORDER: [TaskType; 9] = [
        TaskType::CodeGeneration,
        TaskType::CodeReview,
        TaskType::Summarization,
        TaskType::Analysis,
        TaskType::CreativeWriting,
        TaskType::DataExtraction,
        TaskType::Translation,
        TaskType::QuestionAnswering,
        TaskType::General,
    ];
}

struct Pattern {
    re: Regex,
    weight: u32,
}

fn build(pairs: &[(&str, u32)]) -> Vec<Pattern> {
    pairs
        .iter()
        .map(|(pat, weight)| Pattern {
            re: Regex::new(&format!("(?i){pat}")).expect("static pattern must compile"),
            weight: *weight,
        })
        .collect()
}

static CODE_GENERATION: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\bwrite (a|some|the) (function|method|class|script|program)\b", 3),
        (r"\bimplement\b", 3),
        (r"\bcreate a (function|class|component|module|endpoint|api)\b", 3),
        (r"\bgenerate (code|a script|boilerplate)\b", 3),
        (r"\brefactor\b", 2),
        (r"\badd (a|an) (feature|endpoint|method|test)\b", 2),
        (r"\bbuild (a|an)\b.*\b(app|cli|api|tool)\b", 2),
        (r"\bfix (the |this )?bug\b", 2),
        (r"```[a-z]*\n", 2),
        (r"\bdef |function\s*\(|fn \w+\(|class \w+", 2),
        (r"\bwrite (unit )?tests? for\b", 2),
        (r"\bcode (it|this) up\b", 1),
        (r"\bport (this|it) to\b", 2),
        (r"\boptimize (this|the) (code|function|algorithm)\b", 2),
        (r"\bconvert (this )?(code|script) (to|into)\b", 2),
    ])
});

static CODE_REVIEW: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\breview (this|the|my) (code|pr|pull request|diff)\b", 4),
        (r"\bcode review\b", 4),
        (r"\bfind (bugs|issues|vulnerabilities) in\b", 3),
        (r"\bis this code (correct|safe|secure|idiomatic)\b", 3),
        (r"\bwhat'?s wrong with this code\b", 3),
        (r"\bcritique (this|my) (code|implementation)\b", 3),
        (r"\bsecurity (audit|review)\b", 3),
        (r"\blint\b", 1),
        (r"\bcode smell\b", 2),
        (r"\bany (issues|problems) (with|in) this\b", 2),
    ])
});

static SUMMARIZATION: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\bsummarize\b", 4),
        (r"\btl;?dr\b", 3),
        (r"\bgive me a summary\b", 4),
        (r"\bin (a )?few sentences\b", 2),
        (r"\bkey (points|takeaways)\b", 2),
        (r"\bcondense\b", 3),
        (r"\bshorten (this|the) (text|article|document)\b", 3),
        (r"\bmain (idea|points) of\b", 2),
        (r"\bwhat is this (article|document|text) about\b", 2),
        (r"\bexecutive summary\b", 3),
    ])
});

static ANALYSIS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\banaly[sz]e\b", 4),
        (r"\bcompare\b.*\band\b", 3),
        (r"\bevaluate\b", 3),
        (r"\bassess\b", 3),
        (r"\bpros and cons\b", 3),
        (r"\bwhat (are|is) the (implications|tradeoffs|trade-offs)\b", 3),
        (r"\bbreak down\b", 2),
        (r"\broot cause\b", 3),
        (r"\bdata (analysis|insights)\b", 3),
        (r"\btrend(s)? in\b", 2),
        (r"\binterpret (this|the) (data|results)\b", 3),
    ])
});

static CREATIVE_WRITING: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\bwrite a (story|poem|song|lyric|script|novel)\b", 4),
        (r"\bwrite an? (essay|article|blog post)\b", 3),
        (r"\bonce upon a time\b", 3),
        (r"\bcompose a\b", 3),
        (r"\bbrainstorm (names|ideas|titles)\b", 2),
        (r"\bcreative writing\b", 4),
        (r"\bwrite (me )?a (haiku|sonnet|limerick)\b", 4),
        (r"\bfictional\b", 2),
        (r"\bcharacter (backstory|development)\b", 3),
        (r"\bworld-?building\b", 2),
    ])
});

static DATA_EXTRACTION: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\bextract\b", 4),
        (r"\bparse (this|the) (json|csv|xml|html|text)\b", 3),
        (r"\bpull out (the|all)\b", 2),
        (r"\bconvert (this )?to (json|csv|a table)\b", 3),
        (r"\bstructure this (data|text) (as|into)\b", 3),
        (r"\blist all (the )?(names|emails|dates|entities)\b", 3),
        (r"\bscrape\b", 2),
        (r"\bfind all (occurrences|instances|mentions) of\b", 2),
        (r"\btabulate\b", 2),
    ])
});

static TRANSLATION: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"\btranslate\b", 4),
        (r"\bin (spanish|french|german|japanese|chinese|korean|italian|portuguese|russian)\b", 3),
        (r"\bfrom (english|spanish|french|german) to\b", 4),
        (r"\bhow do you say\b", 3),
        (r"\bwhat does .* mean in\b", 2),
        (r"\blocali[sz]e (this|the)\b", 2),
    ])
});

static QUESTION_ANSWERING: Lazy<Vec<Pattern>> = Lazy::new(|| {
    build(&[
        (r"^\s*(what|who|when|where|why|how|which|is|are|does|do|can|could|should)\b", 2),
        (r"\?\s*$", 1),
        (r"\bexplain\b", 2),
        (r"\bwhat is\b", 2),
        (r"\bhow does .* work\b", 3),
        (r"\bdefine\b", 2),
        (r"\btell me about\b", 2),
    ])
});

fn catalogue(task: TaskType) -> &'static Lazy<Vec<Pattern>> {
    match task {
        TaskType::CodeGeneration => &CODE_GENERATION,
        TaskType::CodeReview => &CODE_REVIEW,
        TaskType::Summarization => &SUMMARIZATION,
        TaskType::Analysis => &ANALYSIS,
        TaskType::CreativeWriting => &CREATIVE_WRITING,
        TaskType::DataExtraction => &DATA_EXTRACTION,
        TaskType::Translation => &TRANSLATION,
        TaskType::QuestionAnswering => &QUESTION_ANSWERING,
        TaskType::General => unreachable!("General has no pattern catalogue"),
    }
}

/// Infers the dominant task type of `text` and a confidence in `[0, 0.95]`.
///
/// Declaration order ([`TaskType::ORDER`]) breaks ties. If the winning
/// score is `<= 1`, the result is [`TaskType::General`] with confidence 0.
pub fn infer(text: &str) -> (TaskType, f64) {
    let mut best_task = TaskType::General;
    let mut best_score: u32 = 0;
    let mut best_total: u32 = 0;

    for &task in TaskType::ORDER.iter() {
        if task == TaskType::General {
            continue;
        }
        let patterns = catalogue(task);
        let total: u32 = patterns.iter().map(|p| p.weight).sum();
        let matched: u32 = patterns.iter().filter(|p| p.re.is_match(text)).map(|p| p.weight).sum();

        if matched > best_score {
            best_score = matched;
            best_task = task;
            best_total = total;
        }
    }

    if best_score <= 1 {
        return (TaskType::General, 0.0);
    }

    let confidence = (best_score as f64 / best_total as f64).min(0.95);
    (best_task, confidence)
}
