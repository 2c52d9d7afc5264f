//! 事实提取
//!
//! 所有解析器实现 Parser trait（trait_name / parse），由 ParserRegistry 在启动时静态注册，
//! 对 Agent 输出统一调用 parse_all。解析器是纯函数：同一输入总得到同一结果，非法输入返回空列表。

mod ip;

use std::sync::Arc;

use crate::objects::Fact;

pub use ip::IpParser;

/// 事实解析器
pub trait Parser: Send + Sync {
    /// 产出事实的 trait 名（如 host.ip.address）
    fn trait_name(&self) -> &str;

    /// 从输出文本中提取事实；结果有限且可重复获取
    fn parse(&self, blob: &str) -> Vec<Fact>;
}

/// 解析器注册表：按注册顺序保存 Arc<dyn Parser>
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置解析器
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(IpParser::new());
        registry
    }

    /// 注册解析器；同名 trait 的旧解析器被替换
    pub fn register(&mut self, parser: impl Parser + 'static) {
        let parser: Arc<dyn Parser> = Arc::new(parser);
        match self
            .parsers
            .iter()
            .position(|p| p.trait_name() == parser.trait_name())
        {
            Some(idx) => self.parsers[idx] = parser,
            None => self.parsers.push(parser),
        }
    }

    pub fn get(&self, trait_name: &str) -> Option<Arc<dyn Parser>> {
        self.parsers
            .iter()
            .find(|p| p.trait_name() == trait_name)
            .cloned()
    }

    pub fn trait_names(&self) -> Vec<String> {
        self.parsers.iter().map(|p| p.trait_name().to_string()).collect()
    }

    /// 依次执行所有解析器并拼接结果
    pub fn parse_all(&self, blob: &str) -> Vec<Fact> {
        self.parsers.iter().flat_map(|p| p.parse(blob)).collect()
    }
}
