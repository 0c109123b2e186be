use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 练习场景（对应前端的场景选择器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scenario {
    #[default]
    JobInterviewIntroduction,
    TeamMeetingPresentation,
    ClientPitch,
    DifficultConversation,
    PublicSpeaking,
    FreePractice,
}

/// 无法识别的场景名称
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scenario: {0}")]
pub struct UnknownScenario(pub String);

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::JobInterviewIntroduction,
        Scenario::TeamMeetingPresentation,
        Scenario::ClientPitch,
        Scenario::DifficultConversation,
        Scenario::PublicSpeaking,
        Scenario::FreePractice,
    ];

    /// 场景的展示名称，也是序列化和传给分析进程的字符串
    pub fn label(&self) -> &'static str {
        match self {
            Scenario::JobInterviewIntroduction => "Job Interview Introduction",
            Scenario::TeamMeetingPresentation => "Team Meeting Presentation",
            Scenario::ClientPitch => "Client Pitch",
            Scenario::DifficultConversation => "Difficult Conversation",
            Scenario::PublicSpeaking => "Public Speaking",
            Scenario::FreePractice => "Free Practice",
        }
    }

    /// 场景专属建议，按优先级排列
    ///
    /// 自由练习没有专属建议，使用通用的四条。
    pub fn tips(&self) -> [&'static str; 4] {
        match self {
            Scenario::JobInterviewIntroduction => [
                "Maintain consistent eye contact with the interviewer",
                "Use confident but not aggressive hand gestures",
                "Keep your posture upright and engaged",
                "Practice your introduction to sound natural and confident",
            ],
            Scenario::TeamMeetingPresentation => [
                "Engage with all team members through eye contact",
                "Use gestures to emphasize key points",
                "Vary your vocal tone to maintain interest",
                "Include pauses for questions and feedback",
            ],
            Scenario::ClientPitch => [
                "Project confidence through your posture and voice",
                "Use open hand gestures to build trust",
                "Maintain professional eye contact",
                "Practice your pitch until it feels natural",
            ],
            Scenario::DifficultConversation => [
                "Show empathy through your facial expressions",
                "Use calm, measured gestures",
                "Maintain appropriate eye contact without being confrontational",
                "Practice active listening body language",
            ],
            Scenario::PublicSpeaking => [
                "Project your voice clearly and confidently",
                "Use expansive gestures that reach the entire audience",
                "Maintain eye contact with different sections of the audience",
                "Practice your speech timing and pacing",
            ],
            Scenario::FreePractice => [
                "Focus on natural, comfortable body language",
                "Practice maintaining consistent eye contact",
                "Work on coordinating gestures with your speech",
                "Record yourself regularly to track improvement",
            ],
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Scenario::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}

impl Serialize for Scenario {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Scenario {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}
