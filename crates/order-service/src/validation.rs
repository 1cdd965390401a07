//! 订单准入校验
//!
//! 规则以 `validator` 派生宏声明在模型上，这里负责把嵌套的错误树
//! 展平为按固定顺序排列的违规列表，保证同一订单总是得到同样的首条错误。

use std::fmt;

use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::models::Order;

/// 去除空白后不能为空
pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// 单条违规：字段路径 + 规则码 + 可读信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 字段路径，如 `delivery.phone`、`items[0].price`
    pub field: String,
    /// 规则码：blank / range / length
    pub code: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// 校验失败结果，至少包含一条违规
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    violations: Vec<Violation>,
}

impl ValidationFailure {
    fn new(mut violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            violations.push(Violation {
                field: "order".to_string(),
                code: "invalid".to_string(),
                message: "订单校验失败".to_string(),
            });
        }
        violations.sort_by(|a, b| {
            canonical_rank(&a.field)
                .cmp(&canonical_rank(&b.field))
                .then_with(|| a.field.cmp(&b.field))
        });
        Self { violations }
    }

    /// 按固定顺序的第一条违规
    pub fn first(&self) -> &Violation {
        &self.violations[0]
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first())?;
        if self.violations.len() > 1 {
            write!(f, " (另有 {} 项)", self.violations.len() - 1)?;
        }
        Ok(())
    }
}

/// 校验订单聚合
pub fn validate_order(order: &Order) -> Result<(), ValidationFailure> {
    match order.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let mut violations = Vec::new();
            flatten(&errors, "", &mut violations);
            Err(ValidationFailure::new(violations))
        }
    }
}

fn flatten(errors: &ValidationErrors, prefix: &str, out: &mut Vec<Violation>) {
    for (field, kind) in errors.errors() {
        let field: &str = field;
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(errs) => {
                for err in errs {
                    out.push(Violation {
                        field: path.clone(),
                        code: err.code.to_string(),
                        message: err
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("{path} 不合法")),
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    flatten(inner, &format!("{path}[{idx}]"), out);
                }
            }
        }
    }
}

/// 顶层字段的固定顺序，商品字段排在其后并按下标升序
const FIELD_ORDER: [&str; 9] = [
    "order_uid",
    "track_number",
    "delivery.name",
    "delivery.phone",
    "delivery.address",
    "payment.transaction",
    "payment.currency",
    "payment.amount",
    "items",
];

fn canonical_rank(field: &str) -> (usize, usize, u8) {
    if let Some(pos) = FIELD_ORDER.iter().position(|f| *f == field) {
        return (pos, 0, 0);
    }

    if let Some(rest) = field.strip_prefix("items[")
        && let Some((idx, tail)) = rest.split_once("].")
        && let Ok(idx) = idx.parse::<usize>()
    {
        let sub = match tail {
            "name" => 0,
            "price" => 1,
            _ => 2,
        };
        return (FIELD_ORDER.len(), idx, sub);
    }

    (usize::MAX, 0, 0)
}
