mod breakpoints;
mod call_stack;
mod expressions;
