mod calculator;
mod issues;
mod reserves;
mod runner;
mod support;
