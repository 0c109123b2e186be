//! 评分与降级策略
//!
//! 把分析调用的结果（成功或各种失败）转换成结构完整的分析结果：
//! - 成功：子评分限幅后原样透传，置信度取分析器自己报告的值
//! - 失败：所有评分为 0、置信度 0.0，只附一条提示用户重新录制的反馈
//!
//! 失败路径绝不生成看似合理的非零评分。

use tracing::warn;

use crate::analyzer::AnalyzerReport;
use crate::error::AnalysisError;
use crate::models::{AnalysisDetails, AnalysisMethod, NewVideoAnalysis, Scores};
use crate::scenario::Scenario;

/// 反馈条目上限
pub const MAX_FEEDBACK_ENTRIES: usize = 6;

/// 每次追加的场景建议条数
pub const SCENARIO_TIPS_PER_RESULT: usize = 2;

/// 分析失败时返回给用户的唯一反馈
pub const FAILURE_FEEDBACK: &str =
    "We could not analyze this video. Please try again with a clear video of a single person facing the camera.";

/// 分数限幅到 [0, 100] 并取整，NaN 视为 0
pub fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// 置信度限幅到 [0.0, 1.0]，NaN 视为 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// 成功路径：限幅评分，保留或生成反馈
pub fn success_result(
    user_id: Option<i64>,
    scenario: Scenario,
    duration: f64,
    report: AnalyzerReport,
) -> NewVideoAnalysis {
    let eye_contact = clamp_score(report.eye_contact);
    let facial_expression = clamp_score(report.facial_expression);
    let gesture = clamp_score(report.gesture);
    let posture = clamp_score(report.posture);
    let overall = match report.overall {
        Some(overall) => clamp_score(overall),
        None => Scores::mean_of_sub_scores(eye_contact, facial_expression, gesture, posture),
    };
    let scores = Scores {
        overall,
        eye_contact,
        facial_expression,
        gesture,
        posture,
    };

    // 分析器自带反馈时原样保留
    let feedback = if report.feedback.iter().any(|line| !line.trim().is_empty()) {
        report
            .feedback
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect()
    } else {
        synthesize_feedback(&scores, scenario)
    };

    let analysis_details = match report.details {
        Some(details) => AnalysisDetails {
            analysis_method: AnalysisMethod::ExternalAnalyzer,
            ..details.clamped(duration)
        },
        None => AnalysisDetails::derive(&scores, duration, AnalysisMethod::ExternalAnalyzer),
    };

    NewVideoAnalysis {
        user_id,
        scenario,
        scores,
        feedback,
        confidence: clamp_confidence(report.confidence),
        analysis_details,
    }
}

/// 失败路径：全零评分 + 一条重试提示
pub fn failure_result(
    user_id: Option<i64>,
    scenario: Scenario,
    duration: f64,
    error: &AnalysisError,
) -> NewVideoAnalysis {
    let method = match error {
        AnalysisError::Unavailable => AnalysisMethod::Unavailable,
        _ => AnalysisMethod::Failed,
    };
    warn!(
        "⚠️  [评分] 分析失败，返回零分结果: kind={}, scenario={}",
        error.kind(),
        scenario
    );

    NewVideoAnalysis {
        user_id,
        scenario,
        scores: Scores::ZERO,
        feedback: vec![FAILURE_FEEDBACK.to_string()],
        confidence: 0.0,
        analysis_details: AnalysisDetails::derive(&Scores::ZERO, duration, method),
    }
}

/// 客户端提交的预计算结果（范围已在请求校验中检查）
pub fn precomputed_result(
    user_id: Option<i64>,
    scenario: Scenario,
    scores: Scores,
    feedback: Vec<String>,
    confidence: f64,
    duration: f64,
) -> NewVideoAnalysis {
    NewVideoAnalysis {
        user_id,
        scenario,
        scores,
        feedback,
        confidence: clamp_confidence(confidence),
        analysis_details: AnalysisDetails::derive(&scores, duration, AnalysisMethod::ClientSubmitted),
    }
}

/// 按分档模板为四项子评分各生成一句反馈，再追加场景建议，最多 6 条
pub fn synthesize_feedback(scores: &Scores, scenario: Scenario) -> Vec<String> {
    let mut feedback = vec![
        tiered(
            scores.eye_contact,
            [
                "Excellent eye contact - you maintained natural, confident gaze patterns",
                "Good eye contact - try to maintain it more consistently throughout",
                "Your eye contact needs improvement - practice looking at the camera/audience more",
                "Focus on maintaining better eye contact - it builds trust and engagement",
            ],
        ),
        tiered(
            scores.facial_expression,
            [
                "Your facial expressions conveyed enthusiasm and sincerity effectively",
                "Good facial expressions - try to show more emotion and engagement",
                "Your expressions were a little flat at times - let your face reflect your message",
                "Work on showing more expression - your face should match your message",
            ],
        ),
        tiered(
            scores.gesture,
            [
                "Excellent use of hand gestures to emphasize your key points",
                "Good gestures - try to coordinate them more closely with your speech",
                "Your gestures were limited - use your hands to reinforce important ideas",
                "Practice using more purposeful hand gestures to enhance your message",
            ],
        ),
        tiered(
            scores.posture,
            [
                "Your posture conveyed confidence and professionalism",
                "Good posture - try to maintain it more consistently",
                "Your posture wavered at times - keep your shoulders back and stay centered",
                "Work on maintaining an upright, confident posture throughout",
            ],
        ),
    ];

    feedback.extend(
        scenario
            .tips()
            .iter()
            .take(SCENARIO_TIPS_PER_RESULT)
            .map(|tip| tip.to_string()),
    );
    feedback.truncate(MAX_FEEDBACK_ENTRIES);
    feedback
}

/// 分档：>=90 / >=80 / >=70 / 其他
fn tiered(score: u8, templates: [&str; 4]) -> String {
    let index = match score {
        90..=u8::MAX => 0,
        80..=89 => 1,
        70..=79 => 2,
        _ => 3,
    };
    templates[index].to_string()
}
