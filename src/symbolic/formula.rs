use super::SymbolicFn;

/// 活性化関数をすべて固定したネットワークが表す閉形式の式。
///
/// 線形結合 `Σ cᵢ atomᵢ + bias` を正規形とし、アトムは変数か関数適用です。
/// 恒等関数は畳み込まれ、同じアトムの項はまとめられます。
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Apply(SymbolicFn, Box<Expr>),
    Linear { terms: Vec<(f64, Expr)>, bias: f64 },
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn constant(value: f64) -> Self {
        Expr::Linear {
            terms: Vec::new(),
            bias: value,
        }
    }

    /// `scale * self + shift`
    pub fn affine(self, scale: f64, shift: f64) -> Self {
        let (terms, bias) = self.into_linear();
        Expr::Linear {
            terms: terms.into_iter().map(|(c, atom)| (c * scale, atom)).collect(),
            bias: bias * scale + shift,
        }
        .normalize()
    }

    /// `fun(self)`
    pub fn apply(self, fun: SymbolicFn) -> Self {
        match fun {
            SymbolicFn::Identity => self,
            SymbolicFn::Zero => Expr::constant(0.0),
            _ => Expr::Apply(fun, Box::new(self)),
        }
    }

    /// 式の和。同じアトムの係数はまとめます。
    pub fn sum(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut terms: Vec<(f64, Expr)> = Vec::new();
        let mut bias = 0.0;
        for expr in exprs {
            let (more, b) = expr.into_linear();
            bias += b;
            for (c, atom) in more {
                match terms.iter_mut().find(|(_, existing)| *existing == atom) {
                    Some((existing, _)) => *existing += c,
                    None => terms.push((c, atom)),
                }
            }
        }
        Expr::Linear { terms, bias }.normalize()
    }

    fn into_linear(self) -> (Vec<(f64, Expr)>, f64) {
        match self {
            Expr::Linear { terms, bias } => (terms, bias),
            atom => (vec![(1.0, atom)], 0.0),
        }
    }

    fn normalize(self) -> Self {
        match self {
            Expr::Linear { terms, bias } if terms.len() == 1 && bias == 0.0 && terms[0].0 == 1.0 => {
                terms.into_iter().next().map(|(_, atom)| atom).unwrap_or(Expr::constant(0.0))
            }
            other => other,
        }
    }

    /// 式を小数点以下 `digits` 桁に丸めて描画します。丸めて0になる項は省きます。
    pub fn render(&self, digits: usize) -> String {
        match self {
            Expr::Var(name) => name.clone(),
            Expr::Apply(fun, arg) => fun.render(&arg.render(digits)),
            Expr::Linear { terms, bias } => {
                let mut out = String::new();
                for (c, atom) in terms {
                    let c = round(*c, digits);
                    if c == 0.0 {
                        continue;
                    }
                    let magnitude = c.abs();
                    let atom = atom.render(digits);
                    let body = if magnitude == 1.0 {
                        atom
                    } else {
                        format!("{}*{}", format_number(magnitude, digits), atom)
                    };
                    push_signed(&mut out, c < 0.0, &body);
                }
                let bias = round(*bias, digits);
                if bias != 0.0 || out.is_empty() {
                    push_signed(&mut out, bias < 0.0, &format_number(bias.abs(), digits));
                }
                out
            }
        }
    }
}

fn push_signed(out: &mut String, negative: bool, body: &str) {
    match (out.is_empty(), negative) {
        (true, false) => out.push_str(body),
        (true, true) => {
            out.push('-');
            out.push_str(body);
        }
        (false, false) => {
            out.push_str(" + ");
            out.push_str(body);
        }
        (false, true) => {
            out.push_str(" - ");
            out.push_str(body);
        }
    }
}

fn round(value: f64, digits: usize) -> f64 {
    let scale = 10f64.powi(digits as i32);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 { 0.0 } else { rounded }
}

fn format_number(value: f64, digits: usize) -> String {
    let text = format!("{value:.digits$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_edges_collapse_into_a_linear_combination() {
        let x = Expr::var("x_1");
        let y = Expr::var("x_2");
        let h = Expr::sum([
            x.apply(SymbolicFn::Identity).affine(2.0, 0.5),
            y.apply(SymbolicFn::Identity).affine(-1.0, 0.25),
        ]);
        assert_eq!(h.render(4), "2*x_1 - x_2 + 0.75");
    }

    #[test]
    fn like_terms_merge_and_vanishing_terms_are_dropped() {
        let x = Expr::var("x_1");
        let e = Expr::sum([x.clone().affine(0.5, 0.0), x.clone().affine(0.5, 0.0)]);
        assert_eq!(e, x);
        assert_eq!(x.clone().affine(1.0, -1e-9).render(5), "x_1");
        assert_eq!(Expr::constant(1e-7).render(5), "0");
    }

    #[test]
    fn nested_functions_render_with_rounded_constants() {
        let inner = Expr::sum([Expr::var("x_1").affine(1.0, 0.0), Expr::var("x_2").affine(-1.0, 0.0)]);
        let e = inner.affine(3.14159265, 1.5707963).apply(SymbolicFn::Sin).affine(-0.5, 0.0);
        assert_eq!(e.render(3), "-0.5*sin(3.142*x_1 - 3.142*x_2 + 1.571)");
        let g = Expr::var("x_1").apply(SymbolicFn::Gaussian);
        assert_eq!(g.render(2), "exp(-(x_1)^2)");
    }

    #[test]
    fn digits_count_places_after_the_decimal_point() {
        assert_eq!(Expr::constant(123.456).render(2), "123.46");
        assert_eq!(Expr::var("x_1").affine(0.001234, 0.0).render(2), "0");
        assert_eq!(Expr::var("x_1").affine(0.001234, 0.0).render(4), "0.0012*x_1");
    }
}
