//! Built-in translation style guides.

pub const DEFAULT_STYLE: &str = "tien_hiep";

#[derive(Debug, Clone, Copy)]
pub struct StyleTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub guidelines: &'static [&'static str],
    pub vocabulary: &'static [(&'static str, &'static str)],
    pub examples: &'static [(&'static str, &'static str)],
}

impl StyleTemplate {
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![format!("**Phong cách: {}**\n", self.description)];

        if !self.guidelines.is_empty() {
            lines.push("### Nguyên tắc dịch thuật".to_owned());
            lines.extend(self.guidelines.iter().map(|g| format!("- {g}")));
            lines.push(String::new());
        }
        if !self.vocabulary.is_empty() {
            lines.push("### Từ vựng chuẩn".to_owned());
            lines.extend(self.vocabulary.iter().map(|(cn, vi)| format!("- {cn} → {vi}")));
            lines.push(String::new());
        }
        if !self.examples.is_empty() {
            lines.push("### Ví dụ".to_owned());
            for (cn, vi) in self.examples.iter().take(3) {
                lines.push(format!("- CN: {cn}"));
                lines.push(format!("  VN: {vi}"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

pub const BUILT_IN: &[StyleTemplate] = &[
    StyleTemplate {
        name: "tien_hiep",
        description: "Văn phong tiên hiệp, tu chân, cổ trang",
        guidelines: &[
            "Sử dụng ngôn ngữ trang trọng, cổ kính",
            "Giữ nguyên tên nhân vật theo phiên âm Hán-Việt",
            "Dùng đại từ nhân xưng cổ: 'ta', 'ngươi', 'hắn', 'y', 'nàng'",
            "Cảnh giới tu luyện giữ nguyên: Luyện Khí, Trúc Cơ, Kim Đan, Nguyên Anh...",
            "Xưng hô tôn kính: 'tiền bối', 'đạo hữu', 'sư huynh/đệ'",
            "Từ ngữ võ thuật giữ Hán-Việt: 'kiếm khí', 'linh lực', 'đan dược'",
        ],
        vocabulary: &[
            ("我", "ta"),
            ("你", "ngươi"),
            ("他", "hắn"),
            ("她", "nàng"),
            ("师父", "sư phụ"),
            ("师兄", "sư huynh"),
            ("前辈", "tiền bối"),
            ("道友", "đạo hữu"),
            ("灵气", "linh khí"),
            ("修炼", "tu luyện"),
            ("突破", "đột phá"),
            ("丹田", "đan điền"),
            ("神识", "thần thức"),
        ],
        examples: &[
            ("你是谁？", "Ngươi là ai?"),
            ("我不知道", "Ta không biết"),
            ("师兄，请指教", "Sư huynh, xin chỉ giáo"),
        ],
    },
    StyleTemplate {
        name: "kiem_hiep",
        description: "Văn phong kiếm hiệp, võ lâm, giang hồ",
        guidelines: &[
            "Ngôn ngữ hào sảng, khí phách giang hồ",
            "Tên nhân vật phiên âm Hán-Việt",
            "Chiêu thức võ công giữ Hán-Việt: 'Giáng Long Thập Bát Chưởng'",
            "Xưng hô giang hồ: 'các hạ', 'tại hạ', 'đại hiệp', 'bang chủ'",
        ],
        vocabulary: &[
            ("大侠", "đại hiệp"),
            ("少侠", "thiếu hiệp"),
            ("在下", "tại hạ"),
            ("阁下", "các hạ"),
            ("江湖", "giang hồ"),
            ("内力", "nội lực"),
            ("轻功", "khinh công"),
            ("掌门", "chưởng môn"),
        ],
        examples: &[
            ("在下有礼了", "Tại hạ xin chào"),
            ("江湖险恶", "Giang hồ hiểm ác"),
        ],
    },
    StyleTemplate {
        name: "huyen_huyen",
        description: "Văn phong huyền huyễn, kỳ ảo, ma pháp",
        guidelines: &[
            "Kết hợp yếu tố đông tây phương",
            "Thuật ngữ ma pháp có thể linh hoạt Hán-Việt hoặc phiên dịch",
            "Miêu tả phép thuật, nguyên tố mang tính huyền ảo",
        ],
        vocabulary: &[
            ("魔法", "ma pháp"),
            ("法师", "pháp sư"),
            ("魔兽", "ma thú"),
            ("斗气", "đấu khí"),
        ],
        examples: &[("魔法阵启动", "Ma pháp trận khởi động")],
    },
    StyleTemplate {
        name: "do_thi",
        description: "Văn phong đô thị, hiện đại, nhẹ nhàng",
        guidelines: &[
            "Ngôn ngữ hiện đại, tự nhiên",
            "Đại từ bình thường: 'tôi', 'bạn', 'anh/chị', 'cậu'",
            "Giọng văn gần gũi, đời thường",
        ],
        vocabulary: &[
            ("我", "tôi"),
            ("老板", "sếp"),
            ("手机", "điện thoại"),
        ],
        examples: &[("谢谢", "Cảm ơn")],
    },
];

pub fn find(name: &str) -> Option<&'static StyleTemplate> {
    BUILT_IN.iter().find(|s| s.name == name)
}

/// Looks up `name`, falling back to the default style.
pub fn resolve(name: &str) -> &'static StyleTemplate {
    match find(name) {
        Some(style) => style,
        None => {
            tracing::warn!(style = name, fallback = DEFAULT_STYLE, "unknown style");
            &BUILT_IN[0]
        }
    }
}
