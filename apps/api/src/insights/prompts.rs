// LLM prompt constants for CV analysis, interview questions and CV optimization.
// Each system prompt pins the exact JSON shape the payload types in models::insights parse.

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;

pub const CV_ANALYSIS_SYSTEM: &str = r#"You are an expert career consultant and ATS (Applicant Tracking System) specialist.
Analyze the provided CV against the job description and provide a detailed assessment.

Please provide your analysis in the following JSON format:
{
  "matchScore": number (0-100),
  "keywordMatch": {
    "matched": string[],
    "missing": string[]
  },
  "strengths": string[],
  "improvements": string[],
  "atsCompatibility": {
    "score": number (0-100),
    "issues": string[]
  }
}"#;

pub const INTERVIEW_QUESTIONS_SYSTEM: &str = r#"You are an experienced hiring manager and interview expert.
Generate relevant interview questions based on the job description and role requirements.

Please provide your response in the following JSON format:
{
  "behavioral": string[],
  "technical": string[],
  "situational": string[],
  "roleSpecific": string[]
}"#;

pub const CV_OPTIMIZATION_SYSTEM: &str = r#"You are a professional CV writer and career consultant.
Analyze the provided CV and suggest specific improvements to better match the job description.

Please provide your response in the following JSON format:
{
  "suggestions": [
    {
      "section": string,
      "original": string,
      "improved": string,
      "reason": string
    }
  ],
  "keywordEnhancements": string[],
  "structuralChanges": string[]
}"#;

/// Appends the JSON-only rules to a feature prompt.
pub fn system_prompt(feature_prompt: &str) -> String {
    format!("{feature_prompt}\n\n{JSON_ONLY_SYSTEM}")
}

/// User message for prompts that compare a CV with a job description.
pub fn cv_and_job_message(cv_text: &str, job: &JobContext<'_>) -> String {
    format!("CV:\n{cv_text}\n\n{}", job_message(job))
}

/// User message for prompts that only need the job description.
pub fn job_message(job: &JobContext<'_>) -> String {
    let mut message = format!("JOB TITLE: {}\n", job.title);
    if let Some(company) = job.company.filter(|c| !c.trim().is_empty()) {
        message.push_str(&format!("COMPANY: {company}\n"));
    }
    message.push_str(&format!("\nJOB DESCRIPTION:\n{}", job.description));
    if let Some(requirements) = job.requirements.filter(|r| !r.trim().is_empty()) {
        message.push_str(&format!("\n\nREQUIREMENTS:\n{requirements}"));
    }
    message
}

pub struct JobContext<'a> {
    pub title: &'a str,
    pub company: Option<&'a str>,
    pub description: &'a str,
    pub requirements: Option<&'a str>,
}
