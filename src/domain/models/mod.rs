//! Domain models for the Atelier engine.

pub mod challenge;
pub mod expert;
pub mod feasibility;
pub mod interrupt;
pub mod questionnaire;
pub mod report;
pub mod requirements;
pub mod review;
pub mod role;
pub mod session;

pub use challenge::{
    AcceptedInsight, ChallengeClass, ChallengeFlag, CompetingFrame, EscalatedChallenge,
    FrameworkSynthesis, InsightUpdate,
};
pub use expert::{
    ExpertHandoffResponse, ExpertOutput, PreflightReport, RiskAssessment, RiskLevel,
    REQUIRED_EXPERT_FIELDS,
};
pub use feasibility::{
    Conflict, ConflictDetection, ConflictDomain, ConflictSeverity, FeasibilityAssessment,
    FeasibilityLevel, PriorityEntry, Recommendation,
};
pub use interrupt::{
    Intent, InteractionType, InterruptPayload, ParsedIntent, ResumeCommand, ResumeValue,
};
pub use questionnaire::{
    AnswerValue, Question, QuestionAnswer, QuestionClass, QuestionType, Questionnaire,
    QuestionnaireSummary,
};
pub use report::{ChallengeResolutions, FinalReport, ReportMetadata, SearchReference};
pub use requirements::{DesignChallengeSpectrum, ExpertHandoff, StructuredRequirements};
pub use review::{
    AcceptedImprovement, BlueStance, BlueTeamReport, BlueValidation, BusinessPriority,
    ClientReview, FeedbackTask, RedBlueDebate, RedIssue, RedTeamReport, RejectedImprovement,
    ReviewDecision, ReviewFeedback, ReviewResult, Strength, REVIEW_SCHEMA_VERSION,
};
pub use role::{
    short_deliverable_id, BaseType, DeliverableSpec, Priority, Role, RoleSelection,
    TaskInstruction,
};
pub use session::{
    AnalysisStage, BatchRecord, InteractionEntry, SessionState, StateDelta, StrategicAnalysis,
    WorkflowStage,
};
