//! Generated artifacts and the JSON payloads the text-generation calls return.
//! Payload field names are camelCase to match what the prompts ask for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    #[serde(default)]
    pub matched: Vec<String>,
    #[serde(default)]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtsCompatibility {
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvAnalysisResult {
    pub match_score: f64,
    #[serde(default)]
    pub keyword_match: KeywordMatch,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub ats_compatibility: AtsCompatibility,
}

impl CvAnalysisResult {
    /// Clamps both scores into 0–100; models occasionally drift outside the range.
    pub fn normalized(mut self) -> Self {
        self.match_score = clamp_score(self.match_score);
        self.ats_compatibility.score = clamp_score(self.ats_compatibility.score);
        self
    }

    pub fn rounded_match_score(&self) -> i32 {
        clamp_score(self.match_score).round() as i32
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewQuestionSet {
    #[serde(default)]
    pub behavioral: Vec<String>,
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub situational: Vec<String>,
    #[serde(default)]
    pub role_specific: Vec<String>,
}

impl InterviewQuestionSet {
    pub fn len(&self) -> usize {
        self.behavioral.len() + self.technical.len() + self.situational.len() + self.role_specific.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub section: String,
    pub original: String,
    pub improved: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvOptimizationSuggestions {
    #[serde(default)]
    pub suggestions: Vec<OptimizationSuggestion>,
    #[serde(default)]
    pub keyword_enhancements: Vec<String>,
    #[serde(default)]
    pub structural_changes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvAnalysisRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cv_document_id: Uuid,
    pub job_description_id: Option<Uuid>,
    pub analysis_result: CvAnalysisResult,
    pub match_score: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewQuestionsRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub job_description_id: Uuid,
    pub questions: InterviewQuestionSet,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvOptimizationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cv_document_id: Uuid,
    pub job_description_id: Option<Uuid>,
    pub optimization_suggestions: CvOptimizationSuggestions,
    pub created_at: DateTime<Utc>,
}
