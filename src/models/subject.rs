/// 科目枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Subject {
    /// 英语
    English = 101,
    /// 斯瓦希里语
    Kiswahili = 102,
    /// 数学
    Mathematics = 121,
    /// 生物
    Biology = 231,
    /// 物理
    Physics = 232,
    /// 化学
    Chemistry = 233,
    /// 历史
    History = 311,
    /// 地理
    Geography = 312,
    /// 宗教
    Religion = 313,
    /// 商科
    Business = 565,
}

impl Subject {
    /// 获取科目代码
    pub fn code(self) -> i16 {
        self as i16
    }

    /// 获取标准名称
    pub fn name(self) -> &'static str {
        match self {
            Subject::English => "英语",
            Subject::Kiswahili => "斯瓦希里语",
            Subject::Mathematics => "数学",
            Subject::Biology => "生物",
            Subject::Physics => "物理",
            Subject::Chemistry => "化学",
            Subject::History => "历史",
            Subject::Geography => "地理",
            Subject::Religion => "宗教",
            Subject::Business => "商科",
        }
    }

    /// 从代码解析科目
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            101 => Some(Subject::English),
            102 => Some(Subject::Kiswahili),
            121 => Some(Subject::Mathematics),
            231 => Some(Subject::Biology),
            232 => Some(Subject::Physics),
            233 => Some(Subject::Chemistry),
            311 => Some(Subject::History),
            312 => Some(Subject::Geography),
            313 => Some(Subject::Religion),
            565 => Some(Subject::Business),
            _ => None,
        }
    }

    /// 尝试从字符串解析科目（精确匹配，支持中英文名称）
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "英语" | "English" => Some(Subject::English),
            "斯瓦希里语" | "Kiswahili" => Some(Subject::Kiswahili),
            "数学" | "Mathematics" | "Maths" => Some(Subject::Mathematics),
            "生物" | "Biology" => Some(Subject::Biology),
            "物理" | "Physics" => Some(Subject::Physics),
            "化学" | "Chemistry" => Some(Subject::Chemistry),
            "历史" | "History" => Some(Subject::History),
            "地理" | "Geography" => Some(Subject::Geography),
            "宗教" | "Religion" | "CRE" => Some(Subject::Religion),
            "商科" | "Business" => Some(Subject::Business),
            _ => None,
        }
    }

    /// 智能查找科目（支持模糊匹配）
    ///
    /// 例如 "Biology Paper 1"、"生物二卷" 都能识别为生物
    pub fn find(s: &str) -> Option<Self> {
        // 先尝试精确匹配
        if let Some(subject) = Self::from_str(s) {
            return Some(subject);
        }

        // 模糊匹配
        let s_lower = s.to_lowercase();
        let table: [(&[&str], Subject); 10] = [
            (&["english", "英语"], Subject::English),
            (&["kiswahili", "斯瓦希里"], Subject::Kiswahili),
            (&["math", "数学"], Subject::Mathematics),
            (&["biology", "生物"], Subject::Biology),
            (&["physics", "物理"], Subject::Physics),
            (&["chemistry", "化学"], Subject::Chemistry),
            (&["history", "历史"], Subject::History),
            (&["geography", "地理"], Subject::Geography),
            (&["religion", "cre", "宗教"], Subject::Religion),
            (&["business", "商科"], Subject::Business),
        ];

        table
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| s_lower.contains(n)))
            .map(|(_, subject)| *subject)
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
