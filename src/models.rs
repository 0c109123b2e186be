use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scenario::Scenario;

/// 四项子评分与综合评分（0-100）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub overall: u8,
    pub eye_contact: u8,
    pub facial_expression: u8,
    pub gesture: u8,
    pub posture: u8,
}

impl Scores {
    /// 全零评分，用于分析失败的结果
    pub const ZERO: Scores = Scores {
        overall: 0,
        eye_contact: 0,
        facial_expression: 0,
        gesture: 0,
        posture: 0,
    };

    /// 四项子评分的平均值（四舍五入）
    pub fn mean_of_sub_scores(eye_contact: u8, facial_expression: u8, gesture: u8, posture: u8) -> u8 {
        let sum = eye_contact as u32 + facial_expression as u32 + gesture as u32 + posture as u32;
        ((sum as f64) / 4.0).round() as u8
    }
}

/// 分析结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMethod {
    /// 外部分析进程给出的真实结果
    #[default]
    ExternalAnalyzer,
    /// 客户端直接提交的预计算结果
    ClientSubmitted,
    /// 启动时探测到分析器不可用
    Unavailable,
    /// 分析进程失败、超时或输出无法解析
    Failed,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeContactDetails {
    pub percentage: f64,
    /// 保持目光接触的时长（秒）
    pub duration: f64,
    pub consistency: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FacialExpressionDetails {
    #[serde(default)]
    pub emotions: BTreeMap<String, f64>,
    pub confidence: f64,
    pub engagement: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GestureDetails {
    /// 每分钟手势次数的估计
    pub frequency: f64,
    pub appropriateness: f64,
    pub variety: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostureDetails {
    pub confidence: f64,
    pub stability: f64,
    pub professionalism: f64,
}

/// 每项指标的详细拆解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDetails {
    pub eye_contact: EyeContactDetails,
    pub facial_expressions: FacialExpressionDetails,
    pub gestures: GestureDetails,
    pub posture: PostureDetails,
    #[serde(default)]
    pub analysis_method: AnalysisMethod,
}

impl AnalysisDetails {
    /// 根据（已限幅的）子评分和视频时长推导指标拆解
    ///
    /// 分析器没有提供 analysisDetails 时使用，推导是确定性的。
    pub fn derive(scores: &Scores, duration: f64, method: AnalysisMethod) -> Self {
        let eye = scores.eye_contact as f64;
        let face = scores.facial_expression as f64;
        let gesture = scores.gesture as f64;
        let posture = scores.posture as f64;
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };

        let mut emotions = BTreeMap::new();
        if scores.facial_expression > 0 {
            emotions.insert("confidence".to_string(), face);
            emotions.insert("engagement".to_string(), face);
            emotions.insert("enthusiasm".to_string(), (face * 0.9).round());
        }

        Self {
            eye_contact: EyeContactDetails {
                percentage: eye,
                duration: duration * eye / 100.0,
                consistency: eye,
            },
            facial_expressions: FacialExpressionDetails {
                emotions,
                confidence: face,
                engagement: face,
            },
            gestures: GestureDetails {
                frequency: gesture / 10.0,
                appropriateness: gesture,
                variety: gesture / 2.0,
            },
            posture: PostureDetails {
                confidence: posture,
                stability: posture,
                professionalism: posture,
            },
            analysis_method: method,
        }
    }

    /// 把分析器给出的拆解限制在合法范围内
    ///
    /// 百分比类指标限制在 [0, 100]，目光接触时长不超过视频时长（时长未知时只要求非负），
    /// 手势频率非负；非有限值一律记为 0。
    pub fn clamped(mut self, duration: f64) -> Self {
        let percent = |v: f64| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 };
        let non_negative = |v: f64| if v.is_finite() { v.max(0.0) } else { 0.0 };

        let eye = &mut self.eye_contact;
        eye.percentage = percent(eye.percentage);
        eye.consistency = percent(eye.consistency);
        eye.duration = non_negative(eye.duration);
        if duration.is_finite() && duration > 0.0 {
            eye.duration = eye.duration.min(duration);
        }

        let face = &mut self.facial_expressions;
        face.confidence = percent(face.confidence);
        face.engagement = percent(face.engagement);
        for value in face.emotions.values_mut() {
            *value = percent(*value);
        }

        let gestures = &mut self.gestures;
        gestures.frequency = non_negative(gestures.frequency);
        gestures.appropriateness = percent(gestures.appropriateness);
        gestures.variety = percent(gestures.variety);

        let posture = &mut self.posture;
        posture.confidence = percent(posture.confidence);
        posture.stability = percent(posture.stability);
        posture.professionalism = percent(posture.professionalism);

        self
    }
}

/// 待持久化的分析结果（还没有 id 和创建时间）
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideoAnalysis {
    pub user_id: Option<i64>,
    pub scenario: Scenario,
    pub scores: Scores,
    pub feedback: Vec<String>,
    pub confidence: f64,
    pub analysis_details: AnalysisDetails,
}

/// 已持久化的视频分析结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAnalysisResult {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub scenario: Scenario,
    pub overall_score: u8,
    pub eye_contact_score: u8,
    pub facial_expression_score: u8,
    pub gesture_score: u8,
    pub posture_score: u8,
    pub feedback: Vec<String>,
    pub confidence: f64,
    pub analysis_details: AnalysisDetails,
    pub created_at: DateTime<Utc>,
}

impl VideoAnalysisResult {
    pub fn from_new(id: i64, created_at: DateTime<Utc>, new: NewVideoAnalysis) -> Self {
        Self {
            id,
            user_id: new.user_id,
            scenario: new.scenario,
            overall_score: new.scores.overall,
            eye_contact_score: new.scores.eye_contact,
            facial_expression_score: new.scores.facial_expression,
            gesture_score: new.scores.gesture,
            posture_score: new.scores.posture,
            feedback: new.feedback,
            confidence: new.confidence,
            analysis_details: new.analysis_details,
            created_at,
        }
    }
}
