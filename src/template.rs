use crate::{
    Context, Syntax,
    codegen::{self, Program},
    error::{BlockplateError, BlockplateResult, SyntaxError},
    exec::{self, Fault},
    lexer, tree,
};

/// A compiled template that can be rendered with a context.
///
/// Compiling tokenizes the source, builds the tree of embedded blocks and
/// generates a [`Program`] from it. The program is immutable, so one template
/// can be rendered from many threads at once.
///
/// # Example
///
/// ```rust
/// use blockplate::{Context, Template};
///
/// let template = Template::new("//: for i in range(1, 3)\nx{{i}}//!").unwrap();
///
/// let result = template.render(&Context::new()).unwrap();
/// assert_eq!(result, "x1x2");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct Template {
    name: Option<String>,
    syntax: Syntax,
    source: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    program: Program,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            syntax: Syntax,
            source: String,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;

        // The program is not serialized; compile it again.
        let mut builder = Template::builder();
        builder.syntax(helper.syntax);
        if let Some(name) = helper.name {
            builder.name(name);
        }
        builder
            .compile(helper.source)
            .map_err(|e| serde::de::Error::custom(format!("Failed to compile template: {e}")))
    }
}

/// Configures the name and marker syntax of a template before compiling it.
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    name: Option<String>,
    syntax: Syntax,
}

impl TemplateBuilder {
    /// Name reported in errors raised by this template.
    pub fn name<N: Into<String>>(&mut self, name: N) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Marker table used to tokenize the source.
    pub fn syntax(&mut self, syntax: Syntax) -> &mut Self {
        self.syntax = syntax;
        self
    }

    /// Compiles `source` with the configured name and syntax.
    ///
    /// # Errors
    ///
    /// Returns [`BlockplateError::Syntax`] when the source cannot be
    /// tokenized, its blocks do not nest, or the embedded code does not parse.
    pub fn compile<S: Into<String>>(&self, source: S) -> BlockplateResult<Template> {
        let source = source.into();
        let program = compile_program(&source, &self.syntax)
            .map_err(|e| e.with_name(self.name.as_deref()))?;
        debug!(name = ?self.name, "compiled template:\n{program}");

        Ok(Template {
            name: self.name.clone(),
            syntax: self.syntax.clone(),
            source,
            program,
        })
    }
}

fn compile_program(source: &str, syntax: &Syntax) -> Result<Program, SyntaxError> {
    let tokens = lexer::tokenize(source, syntax)?;
    let tree = tree::build(source, tokens, syntax)?;
    codegen::generate(&tree)
}

impl Template {
    /// Compiles an anonymous template with the default syntax.
    ///
    /// # Errors
    ///
    /// Returns [`BlockplateError::Syntax`] if the template is malformed.
    pub fn new<S: Into<String>>(source: S) -> BlockplateResult<Self> {
        Self::builder().compile(source)
    }

    /// Starts configuring a template with a name or a custom [`Syntax`].
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The text the template was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub const fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    pub const fn program(&self) -> &Program {
        &self.program
    }

    /// The generated program as text, for debugging.
    pub fn dump(&self) -> String {
        self.program.to_string()
    }

    /// Names the template reads that it does not bind itself and that
    /// `context` does not provide, in order of first use.
    ///
    /// Rendering with a context missing any of these may fail with
    /// [`BlockplateError::UndefinedVariable`], depending on which branches run.
    ///
    /// # Example
    ///
    /// ```
    /// use blockplate::{Context, Template};
    ///
    /// let template = Template::new("/*: let n = 2 :*/{{ greeting }} x{{ n }} {{ name }}").unwrap();
    /// let mut context = Context::new();
    /// context.insert("greeting", "Hello");
    ///
    /// assert_eq!(template.required_variables(&context), vec!["name"]);
    /// ```
    pub fn required_variables<'t>(&'t self, context: &Context) -> Vec<&'t str> {
        self.program
            .free_variables()
            .into_iter()
            .filter(|name| !context.contains(name))
            .collect()
    }

    /// Renders the template with the provided context.
    ///
    /// The context is only read. Output is produced all at once: a failing
    /// render returns no partial text.
    ///
    /// # Errors
    ///
    /// * [`BlockplateError::UndefinedVariable`] if a name is read that neither
    ///   the template nor the context binds
    /// * [`BlockplateError::Evaluation`] if an embedded statement fails
    ///
    /// Both carry the template name and the generated program text.
    pub fn render(&self, context: &Context) -> BlockplateResult<String> {
        trace!(name = ?self.name, "rendering template");
        let output =
            exec::execute(&self.program, context).map_err(|fault| self.render_error(fault))?;
        trace!(name = ?self.name, bytes = output.len(), "rendered template");
        Ok(output)
    }

    fn render_error(&self, fault: Fault) -> BlockplateError {
        let template_name = self.name.clone();
        let program = self.dump();
        debug!(name = ?self.name, ?fault, "render failed");
        match fault {
            Fault::Undefined(variable_name) => BlockplateError::UndefinedVariable {
                variable_name,
                template_name,
                program,
            },
            Fault::Eval(kind) => BlockplateError::Evaluation {
                kind,
                template_name,
                program,
            },
        }
    }
}
