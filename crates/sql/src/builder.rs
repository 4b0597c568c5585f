//! Expression builder
//!
//! Compiles each binned step function and interaction grid into an ordered
//! branch expression. The null check always comes first. Continuous axes then
//! send text that is not a number to the unknown slot and compare the numeric
//! view against each cut point in ascending order, mirroring [`Bins::locate`].

use crate::expr::{Cond, Expr};
use glassbox_model::{BinTable, Bins, BoundaryRule, FittedAdditiveModel, InteractionTable, Slot};

/// One compiled additive term
#[derive(Debug, Clone, PartialEq)]
pub struct TermExpr {
    /// Feature name, or `a & b` for interactions
    pub name: String,
    pub expr: Expr,
}

/// Compiled terms of one score head
#[derive(Debug, Clone, PartialEq)]
pub struct HeadExprs {
    pub label: Option<String>,
    pub intercept: f64,
    pub terms: Vec<TermExpr>,
}

/// Branch over the slots of one axis, producing `on_slot(slot)` in each branch
pub fn dispatch(column: &str, bins: &Bins, boundary: BoundaryRule, on_slot: &dyn Fn(Slot) -> Expr) -> Expr {
    let value = Expr::column(column);
    let mut branches = vec![(Cond::IsNull(value.clone()), on_slot(Slot::Missing))];
    match bins {
        Bins::Continuous { cuts } => {
            let number = Expr::numeric(value);
            branches.push((Cond::IsNull(number.clone()), on_slot(Slot::Unknown)));
            for (i, &cut) in cuts.iter().enumerate() {
                let threshold = Expr::Number(cut);
                let cond = match boundary {
                    BoundaryRule::LeftClosed => Cond::Lt(number.clone(), threshold),
                    BoundaryRule::RightClosed => Cond::Le(number.clone(), threshold),
                };
                branches.push((cond, on_slot(Slot::Bin(i))));
            }
            Expr::case(branches, on_slot(Slot::Bin(cuts.len())))
        }
        Bins::Nominal { categories } => {
            for (i, category) in categories.iter().enumerate() {
                branches.push((Cond::EqText(value.clone(), category.clone()), on_slot(Slot::Bin(i))));
            }
            Expr::case(branches, on_slot(Slot::Unknown))
        }
    }
}

pub fn bin_table_expr(table: &BinTable, boundary: BoundaryRule) -> Expr {
    dispatch(&table.feature, &table.bins, boundary, &|slot: Slot| {
        Expr::Number(table.slot_score(slot))
    })
}

/// Outer dispatch on the first feature, inner dispatch on the second
pub fn interaction_expr(table: &InteractionTable, boundary: BoundaryRule) -> Expr {
    dispatch(&table.features[0], &table.axes[0], boundary, &|outer: Slot| {
        dispatch(&table.features[1], &table.axes[1], boundary, &|inner: Slot| {
            Expr::Number(table.cell(outer, inner))
        })
    })
}

/// Compile every head's terms in declaration order: mains, then interactions
pub fn build_terms(model: &FittedAdditiveModel) -> Vec<HeadExprs> {
    model
        .heads
        .iter()
        .map(|head| {
            let mains = head.mains.iter().map(|table| TermExpr {
                name: table.feature.clone(),
                expr: bin_table_expr(table, model.boundary),
            });
            let interactions = head.interactions.iter().map(|table| TermExpr {
                name: table.name(),
                expr: interaction_expr(table, model.boundary),
            });
            HeadExprs {
                label: head.label.clone(),
                intercept: head.intercept,
                terms: mains.chain(interactions).collect(),
            }
        })
        .collect()
}
