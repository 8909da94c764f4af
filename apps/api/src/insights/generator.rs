//! Generation pipelines: gate on usage, load the user's documents, call the LLM,
//! persist the artifact, then record the activity.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::billing::usage::{ensure_within_limit, insert_within_limit, Allowance};
use crate::errors::AppError;
use crate::gateway::{row_into, to_row, DataGateway, Filter, Table};
use crate::insights::prompts::{
    cv_and_job_message, job_message, system_prompt, JobContext, CV_ANALYSIS_SYSTEM,
    CV_OPTIMIZATION_SYSTEM, INTERVIEW_QUESTIONS_SYSTEM,
};
use crate::llm_client::{parse_json, LlmClient, Usage, DEFAULT_MAX_TOKENS};
use crate::models::documents::{CvDocumentRow, JobDescriptionRow};
use crate::models::insights::{
    CvAnalysisResult, CvAnalysisRow, CvOptimizationRow, CvOptimizationSuggestions,
    InterviewQuestionSet, InterviewQuestionsRow,
};
use crate::models::session::ActivityType;

/// Who is asking. `session_id` ties activity rows to a browser session.
#[derive(Debug, Clone)]
pub struct Requester {
    pub user_id: Uuid,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewAnalysis<'a> {
    user_id: Uuid,
    cv_document_id: Uuid,
    job_description_id: Uuid,
    analysis_result: &'a CvAnalysisResult,
    match_score: i32,
}

#[derive(Debug, Serialize)]
struct NewInterviewQuestions<'a> {
    user_id: Uuid,
    job_description_id: Uuid,
    questions: &'a InterviewQuestionSet,
}

#[derive(Debug, Serialize)]
struct NewOptimization<'a> {
    user_id: Uuid,
    cv_document_id: Uuid,
    job_description_id: Uuid,
    optimization_suggestions: &'a CvOptimizationSuggestions,
}

#[derive(Debug, Serialize)]
struct NewSession<'a> {
    user_id: Uuid,
    session_id: &'a str,
    activity_type: ActivityType,
    activity_data: Value,
}

/// Scores a CV against a job description.
pub async fn analyze_cv(
    gateway: &dyn DataGateway,
    llm: &LlmClient,
    requester: &Requester,
    cv_document_id: Uuid,
    job_description_id: Uuid,
) -> Result<CvAnalysisRow, AppError> {
    let user_id = requester.user_id;
    let allowance =
        ensure_within_limit(gateway, user_id, ActivityType::CvAnalysis, Utc::now()).await?;

    let cv = load_cv(gateway, user_id, cv_document_id).await?;
    let job = load_job(gateway, user_id, job_description_id).await?;

    let (result, usage) = generate_payload::<CvAnalysisResult>(
        llm,
        CV_ANALYSIS_SYSTEM,
        &cv_and_job_message(&cv.content, &job_context(&job)),
    )
    .await?;
    let result = result.normalized();
    info!(%user_id, match_score = result.match_score, "CV analysis generated");

    let new_row = NewAnalysis {
        user_id,
        cv_document_id,
        job_description_id,
        analysis_result: &result,
        match_score: result.rounded_match_score(),
    };
    let row: CvAnalysisRow = persist(gateway, &allowance, &new_row).await?;

    record_activity(gateway, requester, ActivityType::CvAnalysis, row.id, usage).await;
    Ok(row)
}

/// Generates interview questions for a job description.
pub async fn generate_interview_questions(
    gateway: &dyn DataGateway,
    llm: &LlmClient,
    requester: &Requester,
    job_description_id: Uuid,
) -> Result<InterviewQuestionsRow, AppError> {
    let user_id = requester.user_id;
    let allowance =
        ensure_within_limit(gateway, user_id, ActivityType::InterviewQuestions, Utc::now()).await?;

    let job = load_job(gateway, user_id, job_description_id).await?;

    let (questions, usage) = generate_payload::<InterviewQuestionSet>(
        llm,
        INTERVIEW_QUESTIONS_SYSTEM,
        &job_message(&job_context(&job)),
    )
    .await?;
    if questions.is_empty() {
        return Err(AppError::Llm("model returned no interview questions".to_string()));
    }
    info!(%user_id, count = questions.len(), "Interview questions generated");

    let new_row = NewInterviewQuestions {
        user_id,
        job_description_id,
        questions: &questions,
    };
    let row: InterviewQuestionsRow =
        persist(gateway, &allowance, &new_row).await?;

    record_activity(gateway, requester, ActivityType::InterviewQuestions, row.id, usage).await;
    Ok(row)
}

/// Suggests CV rewrites that better target a job description.
pub async fn optimize_cv(
    gateway: &dyn DataGateway,
    llm: &LlmClient,
    requester: &Requester,
    cv_document_id: Uuid,
    job_description_id: Uuid,
) -> Result<CvOptimizationRow, AppError> {
    let user_id = requester.user_id;
    let allowance =
        ensure_within_limit(gateway, user_id, ActivityType::CvOptimization, Utc::now()).await?;

    let cv = load_cv(gateway, user_id, cv_document_id).await?;
    let job = load_job(gateway, user_id, job_description_id).await?;

    let (suggestions, usage) = generate_payload::<CvOptimizationSuggestions>(
        llm,
        CV_OPTIMIZATION_SYSTEM,
        &cv_and_job_message(&cv.content, &job_context(&job)),
    )
    .await?;
    info!(
        %user_id,
        suggestions = suggestions.suggestions.len(),
        "CV optimization generated"
    );

    let new_row = NewOptimization {
        user_id,
        cv_document_id,
        job_description_id,
        optimization_suggestions: &suggestions,
    };
    let row: CvOptimizationRow = persist(gateway, &allowance, &new_row).await?;

    record_activity(gateway, requester, ActivityType::CvOptimization, row.id, usage).await;
    Ok(row)
}

async fn load_cv(
    gateway: &dyn DataGateway,
    user_id: Uuid,
    cv_document_id: Uuid,
) -> Result<CvDocumentRow, AppError> {
    let cv: CvDocumentRow = load_owned(gateway, Table::CvDocuments, user_id, cv_document_id).await?;
    if cv.content.trim().is_empty() {
        return Err(AppError::Validation(
            "CV has no text content to analyze".to_string(),
        ));
    }
    Ok(cv)
}

async fn load_job(
    gateway: &dyn DataGateway,
    user_id: Uuid,
    job_description_id: Uuid,
) -> Result<JobDescriptionRow, AppError> {
    load_owned(gateway, Table::JobDescriptions, user_id, job_description_id).await
}

/// Loads a row by id, scoped to its owner so one user cannot read another's documents.
async fn load_owned<T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    table: Table,
    user_id: Uuid,
    id: Uuid,
) -> Result<T, AppError> {
    let row = gateway
        .select(
            table,
            &Filter::new().eq("id", id).eq("user_id", user_id).limit(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("{table} row {id} not found")))?;
    Ok(row_into(row)?)
}

fn job_context(job: &JobDescriptionRow) -> JobContext<'_> {
    JobContext {
        title: &job.title,
        company: job.company.as_deref(),
        description: &job.description,
        requirements: job.requirements.as_deref(),
    }
}

async fn generate_payload<T: DeserializeOwned>(
    llm: &LlmClient,
    feature_prompt: &str,
    message: &str,
) -> Result<(T, Option<Usage>), AppError> {
    let outcome = llm
        .generate(&system_prompt(feature_prompt), message, DEFAULT_MAX_TOKENS)
        .await;
    if !outcome.success {
        return Err(AppError::Llm(
            outcome.error.unwrap_or_else(|| "generation failed".to_string()),
        ));
    }
    let payload = parse_json(&outcome.content)
        .map_err(|e| AppError::Llm(format!("unexpected model output: {e}")))?;
    Ok((payload, outcome.usage))
}

async fn persist<N: Serialize, T: DeserializeOwned>(
    gateway: &dyn DataGateway,
    allowance: &Allowance,
    new_row: &N,
) -> Result<T, AppError> {
    let inserted = insert_within_limit(gateway, allowance, to_row(new_row)?, Utc::now()).await?;
    Ok(row_into(inserted)?)
}

/// Best effort: a failed activity insert is logged and never fails the request.
async fn record_activity(
    gateway: &dyn DataGateway,
    requester: &Requester,
    activity: ActivityType,
    artifact_id: Uuid,
    usage: Option<Usage>,
) {
    let generated_session;
    let session_id = match requester.session_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            generated_session = Uuid::new_v4().to_string();
            &generated_session
        }
    };

    let session = NewSession {
        user_id: requester.user_id,
        session_id,
        activity_type: activity,
        activity_data: json!({ "artifact_id": artifact_id, "usage": usage }),
    };

    let result = match to_row(&session) {
        Ok(row) => gateway.insert(Table::UserSessions, row).await.map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(err) = result {
        warn!(user_id = %requester.user_id, ?activity, error = %err, "Failed to record activity");
    }
}
